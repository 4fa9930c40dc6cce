/// The error type returned by [`RunnerBuilder::build`][build] when one of the
/// mandatory collaborators of a [`Runner`][runner] was not supplied.
///
/// [build]: ./struct.RunnerBuilder.html#method.build
/// [runner]: ./struct.Runner.html
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// No loader was given. Set one with `RunnerBuilder::loader`.
    #[error("no loader was given to the runner")]
    MissingLoader,
    /// No getter was given. Set one with `RunnerBuilder::getter` or
    /// `RunnerBuilder::cell`.
    #[error("no getter was given to the runner")]
    MissingGetter,
    /// No swapper was given. Set one with `RunnerBuilder::swapper` or
    /// `RunnerBuilder::cell`.
    #[error("no swapper was given to the runner")]
    MissingSwapper,
}

/// The error type for invalid [`RunOptions`][run-options].
///
/// Options are validated once, at the beginning of `start`. When validation
/// fails, the loader is never called and no background thread is spawned.
///
/// [run-options]: ./struct.RunOptions.html
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    /// The tick interval was negative.
    #[error("negative tick value: {secs}s")]
    NegativeTick { secs: f64 },
    /// The tick interval was NaN, infinite or too large to be represented as a
    /// `Duration`.
    #[error("invalid tick value: {secs}s")]
    InvalidTick { secs: f64 },
    /// Neither a manual trigger nor a positive tick was configured, so the value
    /// could never be reloaded.
    #[error("either a manual trigger or a positive tick must be set")]
    NoTrigger,
}

/// The error type returned by `start` of [`Runner`][runner],
/// [`LockFree`][lock-free] and [`Transact`][transact].
///
/// [runner]: ./struct.Runner.html
/// [lock-free]: ./struct.LockFree.html
/// [transact]: ./struct.Transact.html
#[derive(thiserror::Error, Debug)]
pub enum RunError<E> {
    /// The run options were rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The initial, synchronous load failed. The store holds no value and the
    /// reload loop was not started.
    ///
    /// A store cannot be started twice, so discard it and construct a new one to
    /// retry.
    #[error("initial load failed: {0}")]
    InitialLoad(E),
    /// The OS refused to spawn the reload thread.
    #[error("failed to spawn the reload thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl<E> RunError<E> {
    /// Returns the loader error if the initial load failed.
    pub fn into_load_error(self) -> Option<E> {
        match self {
            Self::InitialLoad(e) => Some(e),
            Self::Config(_) | Self::Spawn(_) => None,
        }
    }
}

/// The panic payload raised when `start` is called more than once on the same
/// runner or store.
///
/// Starting twice is a programming error, so it is not returned as an ordinary
/// error value. Code embedding a store can still tell it apart from other
/// panics:
///
/// ```rust
/// use monocache::{AlreadyStarted, Context, LockFree, RunOptions};
/// use std::{panic::{catch_unwind, AssertUnwindSafe}, sync::Arc, time::Duration};
///
/// let store = LockFree::new(|_: &Context, _: Option<Arc<u32>>| {
///     Ok::<_, std::io::Error>(Arc::new(1))
/// });
/// let ctx = Context::new();
/// let options = || RunOptions::new().tick(Duration::from_secs(60));
///
/// store.start(&ctx, options()).unwrap();
///
/// let payload = catch_unwind(AssertUnwindSafe(|| store.start(&ctx, options())))
///     .unwrap_err();
/// assert!(payload.downcast_ref::<AlreadyStarted>().is_some());
/// ctx.cancel();
/// ```
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the runner has already been started")]
pub struct AlreadyStarted;
