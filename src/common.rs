use std::time::Duration;

pub(crate) mod error;
pub(crate) mod state;

/// The default interval between two scheduled reloads.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

pub(crate) const THREAD_NAME_PREFIX: &str = "monocache";

pub(crate) fn thread_name(store_name: Option<&str>) -> String {
    match store_name {
        Some(name) => format!("{THREAD_NAME_PREFIX}-{name}"),
        None => format!("{THREAD_NAME_PREFIX}-reloader"),
    }
}

/// `"[name] "` when the store has a name, otherwise an empty string. Used to
/// prefix log messages.
#[cfg(feature = "logging")]
pub(crate) fn log_prefix(store_name: Option<&str>) -> String {
    store_name
        .map(|name| format!("[{name}] "))
        .unwrap_or_default()
}
