use std::{fmt, sync::Arc, time::Duration};

use crossbeam_channel::Receiver;

use crate::{common::DEFAULT_TICK, ConfigError};

pub(crate) type ErrorObserver<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

/// Configures how a store reloads its value. Passed to `start`.
///
/// Every setter replaces the value set by a previous call of the same setter,
/// so the last one wins. The options are validated once, when `start` is
/// called.
///
/// At least one reload trigger must be configured: a manual trigger, a positive
/// tick, or both. The tick defaults to [`DEFAULT_TICK`][default-tick] (one
/// minute), so `RunOptions::new()` alone is valid.
///
/// [default-tick]: ./constant.DEFAULT_TICK.html
///
/// # Examples
///
/// ```rust
/// use monocache::RunOptions;
/// use std::time::Duration;
///
/// let (reload, reload_rx) = crossbeam_channel::unbounded();
///
/// let options: RunOptions<std::io::Error> = RunOptions::new()
///     // Reload on demand...
///     .manual_trigger(reload_rx)
///     // ...and at least every 30 seconds.
///     .tick(Duration::from_secs(30))
///     .on_error(|e| eprintln!("reload failed: {e}"))
///     .name("feature-flags");
/// # drop((reload, options));
/// ```
pub struct RunOptions<E> {
    manual_trigger: Option<Receiver<()>>,
    tick: TickSpec,
    on_error: Option<ErrorObserver<E>>,
    name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum TickSpec {
    Duration(Duration),
    Secs(f64),
}

impl<E> Default for RunOptions<E> {
    fn default() -> Self {
        Self {
            manual_trigger: None,
            tick: TickSpec::Duration(DEFAULT_TICK),
            on_error: None,
            name: None,
        }
    }
}

impl<E> fmt::Debug for RunOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("manual_trigger", &self.manual_trigger.is_some())
            .field("tick", &self.tick)
            .field("on_error", &self.on_error.is_some())
            .field("name", &self.name)
            .finish()
    }
}

impl<E> RunOptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a manual reload trigger. Every `()` received from `trigger` causes
    /// one reload.
    ///
    /// When all senders of the channel are dropped, the trigger is considered
    /// closed. If a tick is also configured, the store keeps reloading on the
    /// tick alone. Otherwise nothing can trigger a reload any more and the
    /// reload loop ends.
    pub fn manual_trigger(self, trigger: Receiver<()>) -> Self {
        Self {
            manual_trigger: Some(trigger),
            ..self
        }
    }

    /// Sets the interval between scheduled reloads. `Duration::ZERO` disables
    /// the timer, leaving the manual trigger as the only reload source.
    ///
    /// The timer is restarted after every reload, including manually triggered
    /// ones. A manual reload therefore postpones the next scheduled one.
    pub fn tick(self, tick: Duration) -> Self {
        Self {
            tick: TickSpec::Duration(tick),
            ..self
        }
    }

    /// Same as [`tick`](#method.tick) with the interval given in seconds. This
    /// is convenient when the interval comes from a configuration file.
    ///
    /// `start` will fail with [`ConfigError::NegativeTick`] for a negative value
    /// and with [`ConfigError::InvalidTick`] for NaN, infinity or a value too
    /// large for a `Duration`.
    pub fn tick_secs_f64(self, secs: f64) -> Self {
        Self {
            tick: TickSpec::Secs(secs),
            ..self
        }
    }

    /// Sets a closure to be called with the error of each failed reload, except
    /// for the initial load, whose error is returned by `start`.
    ///
    /// The store keeps serving its last good value after a failed reload.
    ///
    /// If the closure panics, it is disabled and will not be called again.
    pub fn on_error(self, observer: impl Fn(&E) + Send + Sync + 'static) -> Self {
        Self {
            on_error: Some(Arc::new(observer)),
            ..self
        }
    }

    /// Sets a name for the store. It is used in the name of the reload thread
    /// and, with the `logging` feature, as a prefix of log messages.
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    #[cfg(feature = "logging")]
    pub(crate) fn name_ref(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn resolve(self) -> Result<RunConfig<E>, ConfigError> {
        let tick = match self.tick {
            TickSpec::Duration(d) => d,
            TickSpec::Secs(secs) if secs < 0.0 => return Err(ConfigError::NegativeTick { secs }),
            TickSpec::Secs(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| ConfigError::InvalidTick { secs })?,
        };

        if self.manual_trigger.is_none() && tick.is_zero() {
            return Err(ConfigError::NoTrigger);
        }

        Ok(RunConfig {
            manual_trigger: self.manual_trigger,
            tick,
            on_error: self.on_error,
            name: self.name,
        })
    }
}

/// Validated run options.
pub(crate) struct RunConfig<E> {
    pub(crate) manual_trigger: Option<Receiver<()>>,
    pub(crate) tick: Duration,
    pub(crate) on_error: Option<ErrorObserver<E>>,
    pub(crate) name: Option<String>,
}
