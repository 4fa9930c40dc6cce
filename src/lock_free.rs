use std::{fmt, sync::atomic::Ordering, sync::Arc};

use crossbeam_epoch::{self as epoch, Atomic, Owned};

use crate::{Context, Loader, RunError, RunOptions, RunState, Runner, ValueCell};

/// A single-value cache whose reads and writes never block.
///
/// The value is an `Arc<T>` kept in an [`EpochCell`][epoch-cell]. `get` hands
/// out a clone of the `Arc` that was current at the time of the call; a
/// reload that happens afterwards does not affect it. Readers may see the old
/// or the new value for a short while after a swap.
///
/// The loader must build a complete new `T` for each change. Never mutate a
/// value that has already been published, since readers may be holding it.
/// When in-place updates are needed, use [`Transact`][transact] instead.
///
/// Prefer `LockFree` over `Transact` when you do not need consistent views or
/// partial updates.
///
/// Cloning a `LockFree` is cheap. All clones share the same value and reload
/// loop.
///
/// [epoch-cell]: ./struct.EpochCell.html
/// [transact]: ./struct.Transact.html
///
/// # Examples
///
/// ```rust
/// use monocache::{Context, LockFree, RunOptions};
/// use std::{collections::HashMap, sync::Arc, time::Duration};
///
/// fn fetch_rates() -> Result<HashMap<String, f64>, std::io::Error> {
///     Ok(HashMap::from([("EUR".to_string(), 1.08), ("JPY".to_string(), 0.0067)]))
/// }
///
/// let rates = LockFree::new(|_: &Context, _: Option<Arc<HashMap<String, f64>>>| {
///     fetch_rates().map(Arc::new)
/// });
///
/// let ctx = Context::new();
/// rates
///     .start(&ctx, RunOptions::new().tick(Duration::from_secs(15 * 60)))
///     .unwrap();
///
/// let snapshot = rates.get().unwrap();
/// assert_eq!(snapshot.get("EUR"), Some(&1.08));
///
/// // Stop reloading.
/// ctx.cancel();
/// ```
pub struct LockFree<T, E> {
    runner: Runner<T, E>,
}

impl<T, E> Clone for LockFree<T, E> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for LockFree<T, E>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFree")
            .field("value", &self.runner.get())
            .field("state", &self.runner.state())
            .finish()
    }
}

impl<T, E> LockFree<T, E>
where
    T: Send + Sync + 'static,
{
    /// Creates an empty store that will be filled by `loader`. Call
    /// [`start`](#method.start) to load the value.
    pub fn new(loader: impl Loader<T, Error = E>) -> Self {
        Self {
            runner: Runner::with_cell(loader, Arc::new(EpochCell::new())),
        }
    }

    /// Returns the current value, or `None` if nothing has been loaded yet.
    pub fn get(&self) -> Option<Arc<T>> {
        self.runner.get()
    }

    /// Publishes `value` without calling the loader.
    pub fn swap(&self, value: Arc<T>) {
        self.runner.swap(value)
    }

    pub fn state(&self) -> RunState {
        self.runner.state()
    }
}

impl<T, E> LockFree<T, E>
where
    T: Send + Sync + 'static,
    E: fmt::Display + 'static,
{
    /// Loads the value and starts reloading it in the background. See
    /// [`Runner::start`][runner-start] for the details.
    ///
    /// # Panics
    ///
    /// Panics with an [`AlreadyStarted`][already-started] payload when called
    /// more than once.
    ///
    /// [runner-start]: ./struct.Runner.html#method.start
    /// [already-started]: ./struct.AlreadyStarted.html
    pub fn start(&self, ctx: &Context, options: RunOptions<E>) -> Result<(), RunError<E>> {
        self.runner.start(ctx, options)
    }

    /// Creates a store and starts it right away.
    pub fn started(
        loader: impl Loader<T, Error = E>,
        ctx: &Context,
        options: RunOptions<E>,
    ) -> Result<Self, RunError<E>> {
        let store = Self::new(loader);
        store.start(ctx, options)?;
        Ok(store)
    }
}

/// A [`ValueCell`][value-cell] holding an `Arc<T>` behind an atomic pointer.
///
/// Reads pin the current epoch, load the pointer and clone the `Arc`. Writes
/// exchange the pointer, and the `Arc` that was replaced is released only
/// after every thread that could have loaded it has unpinned.
///
/// [value-cell]: ./trait.ValueCell.html
pub struct EpochCell<T> {
    slot: Atomic<Arc<T>>,
}

impl<T> Default for EpochCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EpochCell<T> {
    pub fn new() -> Self {
        Self {
            slot: Atomic::null(),
        }
    }
}

impl<T> EpochCell<T>
where
    T: Send + Sync,
{
    pub fn load(&self) -> Option<Arc<T>> {
        let guard = &epoch::pin();
        let current = self.slot.load(Ordering::Acquire, guard);
        // SAFETY: A non-null pointer in the slot points to a live `Arc`. It is
        // only destroyed via `defer_destroy` after being unlinked, and we hold
        // the guard while cloning it.
        unsafe { current.as_ref() }.map(Arc::clone)
    }

    pub fn store(&self, value: Arc<T>) {
        let guard = &epoch::pin();
        let previous = self.slot.swap(Owned::new(value), Ordering::AcqRel, guard);
        if !previous.is_null() {
            // SAFETY: `previous` was unlinked by the swap above, so no thread
            // pinning a later epoch can load it.
            unsafe { guard.defer_destroy(previous) };
            // Otherwise the replaced value stays in this thread's local bag
            // until it fills up.
            guard.flush();
        }
    }
}

impl<T> Drop for EpochCell<T> {
    fn drop(&mut self) {
        // SAFETY: We have `&mut self`, so no other thread can access the slot.
        let guard = unsafe { epoch::unprotected() };
        let current = self.slot.load(Ordering::Relaxed, guard);
        if !current.is_null() {
            // SAFETY: The slot was the only owner of this pointer.
            std::mem::drop(unsafe { current.into_owned() });
        }
    }
}

impl<T> ValueCell<T> for EpochCell<T>
where
    T: Send + Sync + 'static,
{
    fn get(&self) -> Option<Arc<T>> {
        self.load()
    }

    fn swap(&self, value: Arc<T>) {
        self.store(value)
    }
}
