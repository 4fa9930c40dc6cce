#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Monocache provides single-value, in-memory caches whose value is reloaded in
//! the background, on a timer, on demand, or both.
//!
//! The anticipated workloads are read-heavy, with none-to-little writes: small
//! lookup tables, parsed configuration, responses of a slow API. The value is
//! produced by a [`Loader`][loader] that you supply, and every reader gets a
//! cheap `Arc` snapshot of the latest successfully loaded value. A failed reload
//! never reaches the readers; they keep getting the last good value.
//!
//! Two stores are provided:
//!
//! - [`LockFree`][lock-free]: reads and writes never block. Each change must
//!   come as a whole new value.
//! - [`Transact`][transact]: the value is behind a reader-writer lock and can
//!   also be read and modified in place with `view` and `update` transactions.
//!
//! Prefer `LockFree` unless you need consistent views or partial updates.
//!
//! Both are built on a [`Runner`][runner], which decides when to reload, and
//! which you can also use with a [`ValueCell`][value-cell] of your own.
//!
//! [loader]: ./trait.Loader.html
//! [lock-free]: ./struct.LockFree.html
//! [transact]: ./struct.Transact.html
//! [runner]: ./struct.Runner.html
//! [value-cell]: ./trait.ValueCell.html
//!
//! # Example
//!
//! ```rust
//! use monocache::{Context, LockFree, RunOptions};
//! use std::{sync::Arc, time::Duration};
//!
//! #[derive(Debug)]
//! struct Settings {
//!     greeting: String,
//! }
//!
//! fn read_settings() -> Result<Settings, std::io::Error> {
//!     Ok(Settings { greeting: "hello".into() })
//! }
//!
//! let settings = LockFree::new(|_ctx: &Context, _old: Option<Arc<Settings>>| {
//!     read_settings().map(Arc::new)
//! });
//!
//! // Reload every 30 seconds, and whenever something is sent to `reload`.
//! let (reload, reload_rx) = crossbeam_channel::unbounded();
//! let ctx = Context::new();
//! settings
//!     .start(
//!         &ctx,
//!         RunOptions::new()
//!             .tick(Duration::from_secs(30))
//!             .manual_trigger(reload_rx)
//!             .on_error(|e| eprintln!("failed to reload the settings: {e}")),
//!     )
//!     .expect("initial load failed");
//!
//! assert_eq!(settings.get().unwrap().greeting, "hello");
//!
//! reload.send(()).unwrap();
//!
//! // Stop reloading. The last value stays available.
//! ctx.cancel();
//! assert!(settings.get().is_some());
//! ```
//!
//! # Starting a store
//!
//! `start` loads the value once, synchronously, and returns the error if that
//! first load fails. It then spawns one thread per store that reloads the value
//! until the [`Context`][context] is cancelled. Reloads never overlap.
//!
//! A store can be started only once. Calling `start` again panics with an
//! [`AlreadyStarted`][already-started] payload, even if the first `start`
//! failed. To retry after a failed start, create a new store.
//!
//! [context]: ./struct.Context.html
//! [already-started]: ./struct.AlreadyStarted.html
//!
//! # Logging
//!
//! Enable the `logging` feature to have the stores report failed reloads and
//! lifecycle events through the [`log`](https://docs.rs/log) crate.

pub(crate) mod cell;
pub(crate) mod common;
pub(crate) mod context;
pub(crate) mod loader;
pub(crate) mod lock_free;
pub(crate) mod options;
pub(crate) mod runner;
pub(crate) mod transact;

pub use cell::ValueCell;
pub use common::{
    error::{AlreadyStarted, BuildError, ConfigError, RunError},
    state::RunState,
    DEFAULT_TICK,
};
pub use context::Context;
pub use loader::Loader;
pub use lock_free::{EpochCell, LockFree};
pub use options::RunOptions;
pub use runner::{Runner, RunnerBuilder};
pub use transact::{LockedCell, Transact};
