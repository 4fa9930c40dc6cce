use std::{convert::Infallible, fmt, sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

/// A cooperative cancellation token.
///
/// A `Context` is created by the caller and handed to `start`. The reload loop
/// keeps running until the context is cancelled; there is no other way to stop
/// it. The same context is passed to every call of the loader, so a long
/// running load can give up early by checking [`is_cancelled`][is-cancelled] or
/// by selecting on [`done`][done].
///
/// Cloning a `Context` is cheap. All clones share the same cancellation state.
///
/// [is-cancelled]: #method.is_cancelled
/// [done]: #method.done
///
/// # Examples
///
/// ```rust
/// use monocache::Context;
/// use std::time::Duration;
///
/// let ctx = Context::new();
/// let child = ctx.clone();
/// assert!(!child.is_cancelled());
///
/// ctx.cancel();
/// assert!(child.is_cancelled());
/// assert!(child.wait_timeout(Duration::from_secs(10)));
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    // Nothing is ever sent. Dropping the sender disconnects every receiver,
    // which is what wakes up the selects.
    canceller: Mutex<Option<Sender<Infallible>>>,
    done: Receiver<Infallible>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Context {
    /// Creates a new context that is not cancelled.
    pub fn new() -> Self {
        let (snd, rcv) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                canceller: Mutex::new(Some(snd)),
                done: rcv,
            }),
        }
    }

    /// Cancels this context and all of its clones. Calling it more than once has
    /// no further effect.
    pub fn cancel(&self) {
        std::mem::drop(self.inner.canceller.lock().take());
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Returns a receiver that becomes ready once this context is cancelled.
    ///
    /// No message is ever delivered; a cancelled context shows up as a
    /// disconnected channel. This makes it usable in a
    /// `crossbeam_channel::select!` next to other channels.
    pub fn done(&self) -> &Receiver<Infallible> {
        &self.inner.done
    }

    /// Blocks until this context is cancelled or `timeout` elapses, whichever
    /// comes first. Returns `true` if the context was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Ok(never) => match never {},
        }
    }
}
