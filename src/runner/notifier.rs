use std::sync::atomic::{AtomicBool, Ordering};

use crate::options::ErrorObserver;

/// Delivers reload errors to the user supplied observer.
pub(crate) struct ErrorNotifier<E> {
    observer: Option<ErrorObserver<E>>,
    is_enabled: AtomicBool,
    #[cfg(feature = "logging")]
    store_name: Option<String>,
}

impl<E> ErrorNotifier<E> {
    pub(crate) fn new(observer: Option<ErrorObserver<E>>, _store_name: Option<String>) -> Self {
        Self {
            observer,
            is_enabled: AtomicBool::new(true),
            #[cfg(feature = "logging")]
            store_name: _store_name,
        }
    }

    pub(crate) fn notify(&self, error: &E) {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let Some(observer) = &self.observer else {
            return;
        };
        if !self.is_enabled.load(Ordering::Acquire) {
            return;
        }

        // Safety: It is safe to assert unwind safety here because we will not
        // call the observer again if it has been panicked.
        let result = catch_unwind(AssertUnwindSafe(|| observer(error)));
        if let Err(_payload) = result {
            self.is_enabled.store(false, Ordering::Release);
            #[cfg(feature = "logging")]
            log_panic(&*_payload, self.store_name.as_deref());
        }
    }

    #[cfg(test)]
    pub(crate) fn is_enabled(&self) -> bool {
        self.is_enabled.load(Ordering::Acquire)
    }
}

#[cfg(feature = "logging")]
pub(crate) fn panic_message<'a>(
    payload: &'a (dyn std::any::Any + Send + 'static),
) -> Option<std::borrow::Cow<'a, str>> {
    // Try to downcast the payload into &str or String.
    (payload.downcast_ref::<&str>().map(|s| (*s).into()))
        .or_else(|| payload.downcast_ref::<String>().map(Into::into))
}

#[cfg(feature = "logging")]
fn log_panic(payload: &(dyn std::any::Any + Send + 'static), store_name: Option<&str>) {
    let sn = crate::common::log_prefix(store_name);

    if let Some(m) = panic_message(payload) {
        log::error!("{sn}Disabled the error observer because it panicked at '{m}'");
    } else {
        log::error!("{sn}Disabled the error observer because it panicked");
    }
}
