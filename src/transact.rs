use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{Context, Loader, RunError, RunOptions, RunState, Runner, ValueCell};

/// A single-value cache guarded by a reader-writer lock, with read-only and
/// read-write transactions over the value.
///
/// Besides `get` and `swap`, which behave like the ones of
/// [`LockFree`][lock-free], `Transact` offers:
///
/// - [`view`](#method.view): runs a closure with shared access to the value.
///   Any number of views can run at the same time.
/// - [`update`](#method.update): runs a closure with exclusive access to the
///   value, so it can be modified in place. An update excludes every other
///   `get`, `swap`, `view`, `update` and reload publication.
///
/// The lock is released when the closure returns or panics.
///
/// # Deadlocks
///
/// The lock is not reentrant. Never call a method of the same store from inside
/// a `view` or `update` closure.
///
/// Cloning a `Transact` is cheap. All clones share the same value and reload
/// loop.
///
/// [lock-free]: ./struct.LockFree.html
///
/// # Examples
///
/// ```rust
/// use monocache::{Context, RunOptions, Transact};
/// use std::{collections::BTreeMap, sync::Arc, time::Duration};
///
/// type Flags = BTreeMap<&'static str, bool>;
///
/// let flags = Transact::new(|_: &Context, old: Option<Arc<Flags>>| {
///     // Keep local overrides when nothing new comes from upstream.
///     Ok::<_, std::io::Error>(old.unwrap_or_else(|| {
///         Arc::new(BTreeMap::from([("dark_mode", false), ("beta", false)]))
///     }))
/// });
///
/// let ctx = Context::new();
/// flags
///     .start(&ctx, RunOptions::new().tick(Duration::from_secs(30)))
///     .unwrap();
///
/// flags.update(|flags| {
///     if let Some(flags) = flags {
///         flags.insert("beta", true);
///     }
/// });
///
/// let enabled = flags.view(|flags| {
///     flags.map_or(0, |flags| flags.values().filter(|on| **on).count())
/// });
/// assert_eq!(enabled, 1);
///
/// ctx.cancel();
/// ```
pub struct Transact<T, E> {
    cell: Arc<LockedCell<T>>,
    runner: Runner<T, E>,
}

impl<T, E> Clone for Transact<T, E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            runner: self.runner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Transact<T, E>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transact")
            .field("value", &*self.cell.value.read())
            .field("state", &self.runner.state())
            .finish()
    }
}

impl<T, E> Transact<T, E>
where
    T: Send + Sync + 'static,
{
    /// Creates an empty store that will be filled by `loader`. Call
    /// [`start`](#method.start) to load the value.
    pub fn new(loader: impl Loader<T, Error = E>) -> Self {
        let cell = Arc::new(LockedCell::new());
        Self {
            runner: Runner::with_cell(loader, Arc::clone(&cell)),
            cell,
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

    /// Runs a read-only transaction.
    ///
    /// `txn` receives the current value, or `None` if nothing has been loaded
    /// yet. No update or swap can happen while it runs.
    pub fn view<R>(&self, txn: impl FnOnce(Option<&T>) -> R) -> R {
        let value = self.cell.value.read();
        txn(value.as_deref())
    }

    /// Runs a read-write transaction.
    ///
    /// `txn` receives the current value, or `None` if nothing has been loaded
    /// yet, and may modify it in place. Its changes are visible to every `get`,
    /// `view` and reload that starts after it returns.
    ///
    /// A snapshot returned by an earlier `get`, or the old value a reload in
    /// progress was given, is never modified under its holder: if the value is
    /// shared that way, it is cloned first and the clone is modified and
    /// published.
    ///
    /// # Cost
    ///
    /// The update is in place only when nothing else holds the `Arc`. While a
    /// `get` snapshot is alive or a reload is running, `update` clones the
    /// whole `T` (hence the `T: Clone` bound) before applying `txn`. Use
    /// [`view`](#method.view) instead of `get` for reads that do not need to
    /// keep the value, so updates stay in place.
    pub fn update<R>(&self, txn: impl FnOnce(Option<&mut T>) -> R) -> R
    where
        T: Clone,
    {
        let mut value = self.cell.value.write();
        txn(value.as_mut().map(Arc::make_mut))
    }
}

impl<T, E> Transact<T, E>
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

/// A [`ValueCell`][value-cell] holding an `Arc<T>` behind a reader-writer
/// lock.
///
/// [value-cell]: ./trait.ValueCell.html
pub struct LockedCell<T> {
    value: RwLock<Option<Arc<T>>>,
}

impl<T> Default for LockedCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockedCell<T> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }
}

impl<T> ValueCell<T> for LockedCell<T>
where
    T: Send + Sync + 'static,
{
    fn get(&self) -> Option<Arc<T>> {
        self.value.read().clone()
    }

    fn swap(&self, value: Arc<T>) {
        *self.value.write() = Some(value);
    }
}
