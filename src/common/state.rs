use crossbeam_utils::atomic::AtomicCell;

/// The lifecycle of a [`Runner`][runner] and the stores built on it.
///
/// The only transition a caller can request is `NotStarted` to `Running`, by
/// calling `start`. A runner moves to `Stopped` when `start` fails, or when its
/// reload loop ends (context cancelled, or no trigger left).
///
/// [runner]: ./struct.Runner.html
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunState {
    /// `start` has not been called yet.
    NotStarted,
    /// `start` has been called and has not failed. The reload loop may be
    /// running, or about to be spawned.
    Running,
    /// The runner will never reload the value again.
    Stopped,
}

impl RunState {
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

pub(crate) struct AtomicRunState(AtomicCell<RunState>);

impl Default for AtomicRunState {
    fn default() -> Self {
        Self(AtomicCell::new(RunState::NotStarted))
    }
}

impl AtomicRunState {
    pub(crate) fn load(&self) -> RunState {
        self.0.load()
    }

    /// Tries to move from `NotStarted` to `Running`. Returns `false` if this
    /// runner has ever been started before.
    pub(crate) fn try_start(&self) -> bool {
        self.0
            .compare_exchange(RunState::NotStarted, RunState::Running)
            .is_ok()
    }

    pub(crate) fn stop(&self) {
        self.0.store(RunState::Stopped);
    }
}
