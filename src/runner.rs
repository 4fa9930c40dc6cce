//! The reload scheduler shared by all stores.

mod notifier;

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{after, never, select, Receiver};

use self::notifier::ErrorNotifier;
use crate::{
    cell::{GetFn, SwapFn},
    common::{
        self,
        state::{AtomicRunState, RunState},
    },
    loader::SharedLoader,
    options::RunConfig,
    AlreadyStarted, BuildError, Context, Loader, RunError, RunOptions, ValueCell,
};

/// Decides when a store's value is reloaded.
///
/// A `Runner` owns the reload loop but not the value. It reads and publishes the
/// value through a getter and a swapper, which are usually provided by a
/// [`ValueCell`][value-cell]. [`LockFree`][lock-free] and
/// [`Transact`][transact] are both a cell plus a runner; use `Runner` directly
/// only to drive a cell of your own.
///
/// `start` performs one synchronous load, publishes its result and then spawns
/// a thread that reloads the value until the given [`Context`][context] is
/// cancelled. At most one load is in flight at any time.
///
/// Cloning a `Runner` is cheap; all clones share the same state.
///
/// [value-cell]: ./trait.ValueCell.html
/// [lock-free]: ./struct.LockFree.html
/// [transact]: ./struct.Transact.html
/// [context]: ./struct.Context.html
///
/// # Examples
///
/// ```rust
/// use monocache::{Context, EpochCell, RunOptions, Runner};
/// use std::{sync::Arc, time::Duration};
///
/// let cell = Arc::new(EpochCell::new());
/// let runner = Runner::builder()
///     .loader(|_: &Context, _: Option<Arc<String>>| {
///         Ok::<_, std::io::Error>(Arc::new("fresh".to_string()))
///     })
///     .cell(Arc::clone(&cell))
///     .build()
///     .unwrap();
///
/// let ctx = Context::new();
/// runner.start(&ctx, RunOptions::new().tick(Duration::from_secs(10))).unwrap();
/// assert_eq!(runner.get().as_deref().map(String::as_str), Some("fresh"));
/// ctx.cancel();
/// ```
pub struct Runner<T, E> {
    state: Arc<AtomicRunState>,
    loader: SharedLoader<T, E>,
    get: GetFn<T>,
    swap: SwapFn<T>,
}

impl<T, E> Clone for Runner<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            loader: Arc::clone(&self.loader),
            get: Arc::clone(&self.get),
            swap: Arc::clone(&self.swap),
        }
    }
}

impl<T, E> fmt::Debug for Runner<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T, E> Runner<T, E> {
    pub fn builder() -> RunnerBuilder<T, E> {
        RunnerBuilder::default()
    }

    /// Creates a runner over `cell`. Infallible counterpart of the builder for
    /// the stores of this crate.
    pub(crate) fn with_cell<C>(loader: impl Loader<T, Error = E>, cell: Arc<C>) -> Self
    where
        C: ValueCell<T>,
    {
        let (get, swap) = cell_accessors(cell);
        Self {
            state: Arc::default(),
            loader: Arc::new(loader),
            get,
            swap,
        }
    }

    /// Returns the current value.
    pub fn get(&self) -> Option<Arc<T>> {
        (self.get)()
    }

    /// Publishes `value` right away, without calling the loader.
    ///
    /// The next reload will receive `value` as its old value.
    pub fn swap(&self, value: Arc<T>) {
        (self.swap)(value)
    }

    pub fn state(&self) -> RunState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }
}

impl<T, E> Runner<T, E>
where
    T: Send + Sync + 'static,
    E: fmt::Display + 'static,
{
    /// Loads the initial value, publishes it, and spawns the reload loop.
    ///
    /// Returns once the initial value is published. The reload loop runs until
    /// `ctx` is cancelled, or until its manual trigger is closed when no tick is
    /// configured.
    ///
    /// # Errors
    ///
    /// - `RunError::Config` if `options` are invalid. The loader is not called.
    /// - `RunError::InitialLoad` if the initial load fails. Nothing is published
    ///   and no reload loop is spawned.
    /// - `RunError::Spawn` if the reload thread could not be spawned.
    ///
    /// After an error the runner is `Stopped` for good. To retry, create a new
    /// runner.
    ///
    /// # Panics
    ///
    /// Panics with an [`AlreadyStarted`][already-started] payload if this runner
    /// (or one of its clones) has been started before, regardless of whether
    /// that start succeeded.
    ///
    /// [already-started]: ./struct.AlreadyStarted.html
    pub fn start(&self, ctx: &Context, options: RunOptions<E>) -> Result<(), RunError<E>> {
        if !self.state.try_start() {
            #[cfg(feature = "logging")]
            log::error!(
                "{}start was called on a runner in state {:?}",
                common::log_prefix(options.name_ref()),
                self.state()
            );
            std::panic::panic_any(AlreadyStarted);
        }

        // Moves the runner to `Stopped` on any early return, or when the reload
        // loop owning it ends.
        let guard = StopGuard::new(Arc::clone(&self.state));

        let config = options.resolve()?;

        #[cfg(feature = "logging")]
        log::debug!(
            "{}Starting (tick: {:?}, manual trigger: {})",
            common::log_prefix(config.name.as_deref()),
            config.tick,
            config.manual_trigger.is_some()
        );

        let value = match self.loader.load(ctx, self.get()) {
            Ok(value) => value,
            Err(e) => {
                #[cfg(feature = "logging")]
                log::warn!(
                    "{}Initial load failed: {e}",
                    common::log_prefix(config.name.as_deref())
                );
                return Err(RunError::InitialLoad(e));
            }
        };
        self.swap(value);

        let thread_name = common::thread_name(config.name.as_deref());
        let reload_loop = ReloadLoop::new(self.clone(), ctx.clone(), config, guard);
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || reload_loop.run())
            .map_err(RunError::Spawn)?;

        Ok(())
    }
}

struct StopGuard(Arc<AtomicRunState>);

impl StopGuard {
    fn new(state: Arc<AtomicRunState>) -> Self {
        Self(state)
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Wakeup {
    Cancelled,
    Manual,
    ManualClosed,
    Tick,
}

struct ReloadLoop<T, E> {
    runner: Runner<T, E>,
    ctx: Context,
    manual_trigger: Receiver<()>,
    tick: Duration,
    notifier: ErrorNotifier<E>,
    #[cfg(feature = "logging")]
    name: Option<String>,
    _guard: StopGuard,
}

impl<T, E> ReloadLoop<T, E>
where
    T: 'static,
    E: fmt::Display + 'static,
{
    fn new(runner: Runner<T, E>, ctx: Context, config: RunConfig<E>, guard: StopGuard) -> Self {
        let RunConfig {
            manual_trigger,
            tick,
            on_error,
            name,
        } = config;

        Self {
            runner,
            ctx,
            manual_trigger: manual_trigger.unwrap_or_else(never),
            tick,
            notifier: ErrorNotifier::new(on_error, name.clone()),
            #[cfg(feature = "logging")]
            name,
            _guard: guard,
        }
    }

    fn timer_enabled(&self) -> bool {
        !self.tick.is_zero()
    }

    fn next_deadline(&self) -> Receiver<std::time::Instant> {
        if self.timer_enabled() {
            after(self.tick)
        } else {
            never()
        }
    }

    fn run(mut self) {
        let mut deadline = self.next_deadline();

        loop {
            let wakeup = select! {
                recv(self.ctx.done()) -> _ => Wakeup::Cancelled,
                recv(self.manual_trigger) -> msg => match msg {
                    Ok(()) => Wakeup::Manual,
                    Err(_) => Wakeup::ManualClosed,
                },
                recv(deadline) -> _ => Wakeup::Tick,
            };

            match wakeup {
                Wakeup::Cancelled => {
                    self.log_exit("the context was cancelled");
                    return;
                }
                Wakeup::ManualClosed if self.timer_enabled() => {
                    // Keep going on the timer alone.
                    self.manual_trigger = never();
                    continue;
                }
                Wakeup::ManualClosed => {
                    self.log_exit("the manual trigger was closed and no tick is set");
                    return;
                }
                Wakeup::Manual | Wakeup::Tick => (),
            }

            // `select!` picks randomly among ready operations, so a queued
            // trigger may win over the cancellation.
            if self.ctx.is_cancelled() {
                self.log_exit("the context was cancelled");
                return;
            }

            deadline = self.next_deadline();

            if !self.reload() {
                self.log_exit("the loader panicked");
                return;
            }
        }
    }

    /// Returns `false` if the loader panicked.
    fn reload(&self) -> bool {
        let old_value = self.runner.get();
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.runner.loader.load(&self.ctx, old_value.clone())
        }));

        match result {
            Ok(Ok(new_value)) => {
                let unchanged = old_value
                    .as_ref()
                    .map_or(false, |old| Arc::ptr_eq(old, &new_value));
                if unchanged {
                    #[cfg(feature = "logging")]
                    log::trace!("{}Value unchanged", self.log_prefix());
                } else {
                    self.runner.swap(new_value);
                    #[cfg(feature = "logging")]
                    log::trace!("{}Published a new value", self.log_prefix());
                }
                true
            }
            Ok(Err(e)) => {
                #[cfg(feature = "logging")]
                log::warn!("{}Reload failed: {e}", self.log_prefix());
                self.notifier.notify(&e);
                true
            }
            Err(_payload) => {
                #[cfg(feature = "logging")]
                match notifier::panic_message(&*_payload) {
                    Some(m) => log::error!("{}The loader panicked at '{m}'", self.log_prefix()),
                    None => log::error!("{}The loader panicked", self.log_prefix()),
                }
                false
            }
        }
    }

    #[cfg(feature = "logging")]
    fn log_prefix(&self) -> String {
        common::log_prefix(self.name.as_deref())
    }

    fn log_exit(&self, _reason: &str) {
        #[cfg(feature = "logging")]
        log::debug!("{}Stopped reloading: {_reason}", self.log_prefix());
    }
}

fn cell_accessors<T, C>(cell: Arc<C>) -> (GetFn<T>, SwapFn<T>)
where
    C: ValueCell<T>,
{
    let get_cell = Arc::clone(&cell);
    (
        Arc::new(move || ValueCell::get(&*get_cell)),
        Arc::new(move |value| ValueCell::swap(&*cell, value)),
    )
}

/// Builds a [`Runner`][runner].
///
/// The loader, the getter and the swapper are all mandatory. The getter and
/// the swapper can be given at once with [`cell`](#method.cell).
///
/// [runner]: ./struct.Runner.html
pub struct RunnerBuilder<T, E> {
    loader: Option<SharedLoader<T, E>>,
    get: Option<GetFn<T>>,
    swap: Option<SwapFn<T>>,
}

impl<T, E> Default for RunnerBuilder<T, E> {
    fn default() -> Self {
        Self {
            loader: None,
            get: None,
            swap: None,
        }
    }
}

impl<T, E> RunnerBuilder<T, E> {
    pub fn loader(self, loader: impl Loader<T, Error = E>) -> Self {
        Self {
            loader: Some(Arc::new(loader)),
            ..self
        }
    }

    /// Sets the closure returning the current value.
    pub fn getter(self, get: impl Fn() -> Option<Arc<T>> + Send + Sync + 'static) -> Self {
        Self {
            get: Some(Arc::new(get)),
            ..self
        }
    }

    /// Sets the closure publishing a new value.
    pub fn swapper(self, swap: impl Fn(Arc<T>) + Send + Sync + 'static) -> Self {
        Self {
            swap: Some(Arc::new(swap)),
            ..self
        }
    }

    /// Sets both the getter and the swapper from a [`ValueCell`][value-cell].
    ///
    /// [value-cell]: ./trait.ValueCell.html
    pub fn cell<C>(self, cell: Arc<C>) -> Self
    where
        C: ValueCell<T>,
    {
        let (get, swap) = cell_accessors(cell);
        Self {
            get: Some(get),
            swap: Some(swap),
            ..self
        }
    }

    /// Builds a `Runner`.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`][build-error] naming the first collaborator that
    /// was not set.
    ///
    /// [build-error]: ./enum.BuildError.html
    pub fn build(self) -> Result<Runner<T, E>, BuildError> {
        Ok(Runner {
            state: Arc::default(),
            loader: self.loader.ok_or(BuildError::MissingLoader)?,
            get: self.get.ok_or(BuildError::MissingGetter)?,
            swap: self.swap.ok_or(BuildError::MissingSwapper)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Runner, RunnerBuilder};
    use crate::{AlreadyStarted, BuildError, ConfigError, Context, RunError, RunOptions, RunState};

    use parking_lot::Mutex;
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    /// Counts loads and swaps of a runner storing its value in a mutex.
    #[derive(Default)]
    struct Spy {
        loads: AtomicU32,
        swaps: AtomicU32,
        value: Mutex<Option<Arc<u32>>>,
    }

    impl Spy {
        fn loads(&self) -> u32 {
            self.loads.load(Ordering::Acquire)
        }

        fn swaps(&self) -> u32 {
            self.swaps.load(Ordering::Acquire)
        }
    }

    /// Builds a runner whose loader records each call, then delegates to `load`
    /// with the 1-based number of the call.
    fn spy_runner<F>(load: F) -> (Runner<u32, String>, Arc<Spy>)
    where
        F: Fn(&Context, Option<Arc<u32>>, u32) -> Result<Arc<u32>, String> + Send + Sync + 'static,
    {
        let spy = Arc::new(Spy::default());
        let (s1, s2, s3) = (Arc::clone(&spy), Arc::clone(&spy), Arc::clone(&spy));

        let runner = Runner::builder()
            .loader(move |ctx: &Context, old: Option<Arc<u32>>| {
                let n = s1.loads.fetch_add(1, Ordering::AcqRel) + 1;
                load(ctx, old, n)
            })
            .getter(move || s2.value.lock().clone())
            .swapper(move |value| {
                s3.swaps.fetch_add(1, Ordering::AcqRel);
                *s3.value.lock() = Some(value);
            })
            .build()
            .unwrap();

        (runner, spy)
    }

    fn fresh_values() -> (Runner<u32, String>, Arc<Spy>) {
        spy_runner(|_, _, n| Ok(Arc::new(n)))
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn build_requires_every_collaborator() {
        let loader = |_: &Context, _: Option<Arc<u32>>| Ok::<_, String>(Arc::new(0));
        let get = || None;
        let swap = |_| {};

        assert!(Runner::builder()
            .loader(loader)
            .getter(get)
            .swapper(swap)
            .build()
            .is_ok());

        let result = RunnerBuilder::<u32, String>::default()
            .getter(get)
            .swapper(swap)
            .build();
        assert_eq!(result.err(), Some(BuildError::MissingLoader));

        let result = Runner::builder().loader(loader).swapper(swap).build();
        assert_eq!(result.err(), Some(BuildError::MissingGetter));

        let result = Runner::builder().loader(loader).getter(get).build();
        assert_eq!(result.err(), Some(BuildError::MissingSwapper));
    }

    #[test]
    fn initial_load_is_synchronous() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();
        assert_eq!(runner.state(), RunState::NotStarted);
        assert_eq!(runner.get(), None);

        runner
            .start(&ctx, RunOptions::new().tick(Duration::from_secs(3600)))
            .unwrap();

        assert_eq!(spy.loads(), 1);
        assert_eq!(spy.swaps(), 1);
        assert_eq!(runner.get().as_deref(), Some(&1));
        assert!(runner.is_running());
        ctx.cancel();
    }

    #[test]
    fn timer_only() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();

        runner
            .start(&ctx, RunOptions::new().tick(Duration::from_millis(10)))
            .unwrap();
        thread::sleep(Duration::from_millis(45));
        ctx.cancel();

        // 1 initial load, then about one every 10ms.
        let loads = spy.loads();
        assert!((3..=6).contains(&loads), "loads: {loads}");
    }

    #[test]
    fn manual_only() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();
        let (reload, reload_rx) = crossbeam_channel::bounded(0);

        runner
            .start(
                &ctx,
                RunOptions::new()
                    .manual_trigger(reload_rx)
                    .tick(Duration::ZERO),
            )
            .unwrap();
        reload.send(()).unwrap();
        reload.send(()).unwrap();
        reload.send(()).unwrap();
        thread::sleep(Duration::from_millis(40));

        assert_eq!(spy.loads(), 4);
        assert_eq!(runner.get().as_deref(), Some(&4));
        assert!(runner.is_running());
        ctx.cancel();
    }

    #[test]
    fn negative_tick() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();

        let result = runner.start(&ctx, RunOptions::new().tick_secs_f64(-1.0));
        assert!(matches!(
            result,
            Err(RunError::Config(ConfigError::NegativeTick { .. }))
        ));
        assert_eq!(spy.loads(), 0);
        assert_eq!(runner.get(), None);
        assert_eq!(runner.state(), RunState::Stopped);
    }

    #[test]
    fn no_triggers() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();

        let result = runner.start(&ctx, RunOptions::new().tick(Duration::ZERO));
        assert!(matches!(
            result,
            Err(RunError::Config(ConfigError::NoTrigger))
        ));
        assert_eq!(spy.loads(), 0);
        assert_eq!(runner.state(), RunState::Stopped);
    }

    #[test]
    fn manual_trigger_closed_without_timer() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();
        let (reload, reload_rx) = crossbeam_channel::bounded(0);

        runner
            .start(
                &ctx,
                RunOptions::new()
                    .manual_trigger(reload_rx)
                    .tick(Duration::ZERO),
            )
            .unwrap();
        reload.send(()).unwrap();
        reload.send(()).unwrap();
        std::mem::drop(reload);

        // The loop ends by itself, without a live lock.
        assert!(wait_until(Duration::from_secs(5), || runner.state()
            == RunState::Stopped));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(spy.loads(), 3);
        ctx.cancel();
    }

    #[test]
    fn manual_trigger_closed_with_timer() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();
        let (reload, reload_rx) = crossbeam_channel::bounded(0);

        runner
            .start(
                &ctx,
                RunOptions::new()
                    .manual_trigger(reload_rx)
                    .tick(Duration::from_millis(10)),
            )
            .unwrap();
        reload.send(()).unwrap();
        reload.send(()).unwrap();
        thread::sleep(Duration::from_millis(40));
        std::mem::drop(reload);

        let loads_at_close = spy.loads();
        thread::sleep(Duration::from_millis(40));

        // Still running on the timer alone.
        assert!(runner.is_running());
        let loads = spy.loads();
        assert!(loads > loads_at_close, "{loads} <= {loads_at_close}");
        assert!((6..=12).contains(&loads), "loads: {loads}");

        ctx.cancel();
        assert!(wait_until(Duration::from_secs(5), || runner.state()
            == RunState::Stopped));
    }

    #[test]
    fn manual_trigger_postpones_tick() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();
        let (reload, reload_rx) = crossbeam_channel::unbounded();
        let started = Instant::now();

        runner
            .start(
                &ctx,
                RunOptions::new()
                    .manual_trigger(reload_rx)
                    .tick(Duration::from_millis(100)),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(60).saturating_sub(started.elapsed()));
        reload.send(()).unwrap();

        // Without the reset, the timer would have fired at 100ms.
        thread::sleep(Duration::from_millis(130).saturating_sub(started.elapsed()));
        assert_eq!(spy.loads(), 2);

        // The timer was restarted at about 60ms, so it fires at about 160ms.
        thread::sleep(Duration::from_millis(220).saturating_sub(started.elapsed()));
        assert_eq!(spy.loads(), 3);
        ctx.cancel();
    }

    #[test]
    fn unchanged_value_is_not_swapped() {
        let ctx = Context::new();
        let (runner, spy) = spy_runner(|_, old, n| Ok(old.unwrap_or_else(|| Arc::new(n))));
        let (reload, reload_rx) = crossbeam_channel::bounded(0);

        runner
            .start(
                &ctx,
                RunOptions::new()
                    .manual_trigger(reload_rx)
                    .tick(Duration::ZERO),
            )
            .unwrap();
        let first = runner.get().unwrap();

        reload.send(()).unwrap();
        reload.send(()).unwrap();
        reload.send(()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || spy.loads() == 4));

        assert_eq!(spy.swaps(), 1);
        assert!(Arc::ptr_eq(&first, &runner.get().unwrap()));
        ctx.cancel();
    }

    #[test]
    fn equal_but_distinct_value_is_swapped() {
        let ctx = Context::new();
        let (runner, spy) = spy_runner(|_, _, _| Ok(Arc::new(42)));
        let (reload, reload_rx) = crossbeam_channel::bounded(0);

        runner
            .start(&ctx, RunOptions::new().manual_trigger(reload_rx))
            .unwrap();
        reload.send(()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || spy.swaps() == 2));
        assert_eq!(runner.get().as_deref(), Some(&42));
        ctx.cancel();
    }

    #[test]
    fn reload_errors_go_to_the_observer() {
        let ctx = Context::new();
        let (runner, spy) = spy_runner(|_, _, n| {
            if n == 1 {
                Ok(Arc::new(n))
            } else {
                Err(format!("load #{n} failed"))
            }
        });
        let errors = Arc::new(Mutex::new(Vec::new()));
        let my_errors = Arc::clone(&errors);
        let (reload, reload_rx) = crossbeam_channel::bounded(0);

        runner
            .start(
                &ctx,
                RunOptions::new()
                    .manual_trigger(reload_rx)
                    .tick(Duration::ZERO)
                    .on_error(move |e: &String| my_errors.lock().push(e.clone())),
            )
            .unwrap();
        reload.send(()).unwrap();
        reload.send(()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || errors.lock().len() == 2));

        assert_eq!(
            *errors.lock(),
            vec!["load #2 failed".to_string(), "load #3 failed".to_string()]
        );
        // The last good value is still served.
        assert_eq!(runner.get().as_deref(), Some(&1));
        assert_eq!(spy.swaps(), 1);
        assert!(runner.is_running());
        ctx.cancel();
    }

    #[test]
    fn panicking_observer_does_not_stop_the_loop() {
        let ctx = Context::new();
        let (runner, spy) = spy_runner(|_, _, n| {
            if n == 1 {
                Ok(Arc::new(n))
            } else {
                Err("failed".to_string())
            }
        });
        let (reload, reload_rx) = crossbeam_channel::bounded(0);

        runner
            .start(
                &ctx,
                RunOptions::new()
                    .manual_trigger(reload_rx)
                    .on_error(|_| panic!("observer panicked")),
            )
            .unwrap();
        reload.send(()).unwrap();
        reload.send(()).unwrap();
        reload.send(()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || spy.loads() == 4));
        assert!(runner.is_running());
        ctx.cancel();
    }

    #[test]
    fn initial_load_failure() {
        let ctx = Context::new();
        let (runner, spy) = spy_runner(|_, _, _| Err("unavailable".to_string()));
        let (reload, reload_rx) = crossbeam_channel::unbounded();
        let errors = Arc::new(AtomicU32::default());
        let my_errors = Arc::clone(&errors);

        let result = runner.start(
            &ctx,
            RunOptions::new()
                .manual_trigger(reload_rx)
                .tick(Duration::from_millis(5))
                .on_error(move |_| {
                    my_errors.fetch_add(1, Ordering::AcqRel);
                }),
        );
        assert_eq!(result.unwrap_err().into_load_error().as_deref(), Some("unavailable"));
        assert_eq!(runner.state(), RunState::Stopped);
        assert_eq!(runner.get(), None);

        // No reload loop was spawned, so the trigger has no receiver left.
        assert!(reload.send(()).is_err());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(spy.loads(), 1);
        // The initial error is returned, not observed.
        assert_eq!(errors.load(Ordering::Acquire), 0);
    }

    #[test]
    fn double_start_panics() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();
        let options = || RunOptions::new().tick(Duration::from_secs(3600));

        runner.start(&ctx, options()).unwrap();

        let clone = runner.clone();
        let payload = catch_unwind(AssertUnwindSafe(|| clone.start(&ctx, options()))).unwrap_err();
        assert_eq!(payload.downcast_ref::<AlreadyStarted>(), Some(&AlreadyStarted));

        // The first start is not disturbed.
        assert!(runner.is_running());
        assert_eq!(spy.loads(), 1);
        ctx.cancel();
    }

    #[test]
    fn start_after_failed_start_panics() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();

        assert!(runner
            .start(&ctx, RunOptions::new().tick(Duration::ZERO))
            .is_err());
        let payload = catch_unwind(AssertUnwindSafe(|| {
            runner.start(&ctx, RunOptions::new().tick(Duration::from_secs(1)))
        }))
        .unwrap_err();
        assert!(payload.is::<AlreadyStarted>());
        assert_eq!(spy.loads(), 0);
        assert_eq!(runner.state(), RunState::Stopped);
    }

    #[test]
    fn cancel_stops_reloading() {
        let ctx = Context::new();
        let (runner, spy) = fresh_values();

        runner
            .start(&ctx, RunOptions::new().tick(Duration::from_millis(5)))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        ctx.cancel();
        assert!(wait_until(Duration::from_secs(5), || runner.state()
            == RunState::Stopped));

        let loads = spy.loads();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(spy.loads(), loads);

        // The value stays readable and writable.
        runner.swap(Arc::new(100));
        assert_eq!(runner.get().as_deref(), Some(&100));
    }

    #[test]
    fn queued_triggers_are_ignored_after_cancel() {
        let ctx = Context::new();
        let (runner, spy) = spy_runner(|ctx, _, n| {
            if n == 5 {
                ctx.cancel();
            }
            Ok(Arc::new(n))
        });
        let (reload, reload_rx) = crossbeam_channel::unbounded();
        for _ in 0..200 {
            reload.send(()).unwrap();
        }

        runner
            .start(&ctx, RunOptions::new().manual_trigger(reload_rx))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || runner.state()
            == RunState::Stopped));
        // The trigger and the cancellation are both ready after the 5th load.
        assert_eq!(spy.loads(), 5);
        assert_eq!(runner.get().as_deref(), Some(&5));
    }

    #[test]
    fn loader_panic_stops_the_loop() {
        let ctx = Context::new();
        let (runner, spy) = spy_runner(|_, _, n| {
            if n == 2 {
                panic!("loader panicked");
            }
            Ok(Arc::new(n))
        });
        let (reload, reload_rx) = crossbeam_channel::unbounded();

        runner
            .start(&ctx, RunOptions::new().manual_trigger(reload_rx))
            .unwrap();
        reload.send(()).unwrap();

        assert!(wait_until(Duration::from_secs(5), || runner.state()
            == RunState::Stopped));
        assert_eq!(spy.loads(), 2);
        assert_eq!(runner.get().as_deref(), Some(&1));
        ctx.cancel();
    }

    #[test]
    fn loader_sees_the_context() {
        let ctx = Context::new();
        let (runner, spy) = spy_runner(|ctx, _, n| {
            if ctx.is_cancelled() {
                Err("cancelled".to_string())
            } else {
                Ok(Arc::new(n))
            }
        });

        ctx.cancel();
        let result = runner.start(&ctx, RunOptions::new());
        assert_eq!(result.unwrap_err().into_load_error().as_deref(), Some("cancelled"));
        assert_eq!(spy.loads(), 1);
    }

    #[test]
    fn swap_bypasses_the_loader() {
        let (runner, spy) = fresh_values();
        runner.swap(Arc::new(7));
        assert_eq!(runner.get().as_deref(), Some(&7));
        assert_eq!(spy.loads(), 0);
        assert_eq!(spy.swaps(), 1);
        assert_eq!(format!("{runner:?}"), "Runner { state: NotStarted, .. }");
    }
}
