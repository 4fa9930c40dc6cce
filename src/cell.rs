use std::sync::Arc;

/// A slot holding the current value of a store.
///
/// A [`Runner`][runner] does not care how the value is stored. It reads the
/// current value with `get` before each reload and publishes a new one with
/// `swap`. This crate provides two cells: [`EpochCell`][epoch-cell], used by
/// [`LockFree`][lock-free], and [`LockedCell`][locked-cell], used by
/// [`Transact`][transact]. Implement this trait to plug a runner onto another
/// kind of storage.
///
/// Both methods may be called from any thread at any time, so an
/// implementation must be safe to use concurrently.
///
/// [runner]: ./struct.Runner.html
/// [epoch-cell]: ./struct.EpochCell.html
/// [lock-free]: ./struct.LockFree.html
/// [locked-cell]: ./struct.LockedCell.html
/// [transact]: ./struct.Transact.html
pub trait ValueCell<T>: Send + Sync + 'static {
    /// Returns the current value, or `None` if no value has been published yet.
    fn get(&self) -> Option<Arc<T>>;

    /// Replaces the current value.
    fn swap(&self, value: Arc<T>);
}

pub(crate) type GetFn<T> = Arc<dyn Fn() -> Option<Arc<T>> + Send + Sync + 'static>;
pub(crate) type SwapFn<T> = Arc<dyn Fn(Arc<T>) + Send + Sync + 'static>;
