use std::sync::Arc;

use crate::Context;

/// Produces a new value for a store, given the current one.
///
/// Typically a repository query or an API call. The loader is called once,
/// synchronously, by `start`, and then from the background reload loop each
/// time a reload is triggered. Calls are never concurrent with each other, so
/// a loader does not have to be reentrant.
///
/// `old` is `None` until the first load has succeeded. Returning the very same
/// `Arc` that was passed in as `old` tells the store that nothing has changed;
/// the store then keeps the current value and does not publish it again. The
/// comparison is by pointer (`Arc::ptr_eq`), not by `PartialEq`.
///
/// Any closure with the right signature is a loader:
///
/// ```rust
/// use monocache::{Context, Loader};
/// use std::sync::Arc;
///
/// let loader = |_ctx: &Context, old: Option<Arc<Vec<u8>>>| {
///     match old {
///         // Nothing to do, keep the current value.
///         Some(v) if !v.is_empty() => Ok(v),
///         _ => Ok::<_, std::io::Error>(Arc::new(vec![1, 2, 3])),
///     }
/// };
///
/// let ctx = Context::new();
/// let first = loader.load(&ctx, None).unwrap();
/// let second = loader.load(&ctx, Some(Arc::clone(&first))).unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
pub trait Loader<T>: Send + Sync + 'static {
    type Error;

    fn load(&self, ctx: &Context, old: Option<Arc<T>>) -> Result<Arc<T>, Self::Error>;
}

impl<T, E, F> Loader<T> for F
where
    F: Fn(&Context, Option<Arc<T>>) -> Result<Arc<T>, E> + Send + Sync + 'static,
{
    type Error = E;

    fn load(&self, ctx: &Context, old: Option<Arc<T>>) -> Result<Arc<T>, E> {
        self(ctx, old)
    }
}

pub(crate) type SharedLoader<T, E> = Arc<dyn Loader<T, Error = E>>;
