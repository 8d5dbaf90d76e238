use crate::aggregator::StatsAggregator;
use crate::clock::{Clock, MonotonicClock};
use crate::consistency::{ConsistencyController, Divergence, VerifyState};
use crate::operation::{ConfigError, EncodeError, InvocationError};
use crate::worker;
use loadcell_core::{RunConfig, StatsReport, WORKER_JOIN_TIMEOUT};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a [`LoadRunner`]. A stopped runner can be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

pub(crate) type Encoder<R> = Arc<dyn Fn(&R) -> Result<Vec<u8>, EncodeError> + Send + Sync>;

/// Everything a worker needs for one run, built fresh on every `start`.
/// Workers hold this explicitly; there is no ambient shared state.
pub(crate) struct RunContext {
    pub config: RunConfig,
    pub stats: Arc<StatsAggregator>,
    pub clock: Arc<dyn Clock>,
    pub verify: Option<VerifyState>,
    running: AtomicBool,
    abort: AtomicBool,
}

impl RunContext {
    fn idle(config: RunConfig, stats: Arc<StatsAggregator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            stats,
            clock,
            verify: None,
            running: AtomicBool::new(false),
            abort: AtomicBool::new(false),
        }
    }

    fn live(
        config: RunConfig,
        stats: Arc<StatsAggregator>,
        clock: Arc<dyn Clock>,
        verify: Option<VerifyState>,
    ) -> Self {
        Self {
            config,
            stats,
            clock,
            verify,
            running: AtomicBool::new(true),
            abort: AtomicBool::new(false),
        }
    }

    pub fn keep_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Tell every worker to stop issuing invocations. Workers drain their
    /// current one but do not start a new tick.
    pub fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Raise the shared abort signal. Returns true for the first caller
    /// only, which gates divergence reporting to a single notification.
    pub fn raise_abort(&self) -> bool {
        self.abort
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

struct OpSlot<Op, I, R> {
    op: Op,
    input: I,
    verify: Option<VerifySetup<R>>,
}

struct VerifySetup<R> {
    encoder: Encoder<R>,
    notify: mpsc::UnboundedSender<Divergence>,
}

/// The load generator: a pool of workers each invoking a caller-supplied
/// operation at its share of a target aggregate rate until told to stop.
///
/// Observers (`is_running`, `completed`, `snapshot`, `state`) are safe to
/// call at any point in the lifecycle, including before the first `start`
/// and after `stop`.
pub struct LoadRunner<Op, I, R> {
    config: RunConfig,
    slot: Option<OpSlot<Op, I, R>>,
    stats: Arc<StatsAggregator>,
    clock: Arc<dyn Clock>,
    ctx: Arc<RunContext>,
    state: RunState,
    workers: Vec<JoinHandle<()>>,
}

impl<Op, I, R> LoadRunner<Op, I, R> {
    pub fn new(config: RunConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    /// Build a runner on an explicit clock, for deterministic tests.
    pub fn with_clock(config: RunConfig, clock: Arc<dyn Clock>) -> Self {
        let stats = Arc::new(StatsAggregator::new());
        let ctx = Arc::new(RunContext::idle(
            config.clone(),
            stats.clone(),
            clock.clone(),
        ));
        Self {
            config,
            slot: None,
            stats,
            clock,
            ctx,
            state: RunState::Idle,
            workers: Vec::new(),
        }
    }

    /// Replace the run configuration. Ignored while a run is in progress;
    /// the configuration is immutable for the duration of a run.
    pub fn configure(&mut self, config: RunConfig) {
        if self.is_running() {
            warn!("configure called mid-run; keeping the active configuration");
            return;
        }
        self.config = config;
    }

    pub fn is_running(&self) -> bool {
        self.ctx.keep_running()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Whether the current (or last) run raised the abort signal, either
    /// through a divergence or a fatal operation error.
    pub fn aborted(&self) -> bool {
        self.ctx.is_aborted()
    }

    /// Completed invocations for the current run (unscaled by batch size).
    pub fn completed(&self) -> u64 {
        self.stats.completed()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn snapshot(&self, include_target_rate: bool) -> StatsReport {
        self.stats
            .snapshot(self.clock.now(), include_target_rate, &self.config)
    }
}

impl<Op, F, I, R> LoadRunner<Op, I, R>
where
    Op: Fn(I) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = Result<R, InvocationError>> + Send + 'static,
    I: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Register the operation under test and the fixed input shared
    /// read-only by all workers (performance mode).
    pub fn set_operation(&mut self, op: Op, input: I) {
        self.slot = Some(OpSlot {
            op,
            input,
            verify: None,
        });
    }

    /// Register the operation under test with result verification: the
    /// first completed invocation's result becomes the run baseline and
    /// every later result must match it, per the controller's compare mode.
    pub fn set_verified_operation(&mut self, op: Op, input: I, controller: &ConsistencyController)
    where
        R: Serialize,
    {
        let mode = controller.mode();
        self.slot = Some(OpSlot {
            op,
            input,
            verify: Some(VerifySetup {
                encoder: Arc::new(move |result: &R| mode.encode(result)),
                notify: controller.sender(),
            }),
        });
    }

    /// Begin a run: reset statistics, rebuild the shared run context, and
    /// spawn one worker per configured slot. No-op when already running.
    ///
    /// Fails only when no operation has been registered.
    pub fn start(&mut self) -> Result<(), ConfigError> {
        if self.is_running() {
            return Ok(());
        }
        let slot = self.slot.as_ref().ok_or(ConfigError::NoOperation)?;

        info!("starting load run: {:?}", self.config);
        self.stats.reset(self.clock.now());

        let verify = slot
            .verify
            .as_ref()
            .map(|setup| VerifyState::new(setup.notify.clone()));
        let ctx = Arc::new(RunContext::live(
            self.config.clone(),
            self.stats.clone(),
            self.clock.clone(),
            verify,
        ));

        self.workers.clear();
        for _ in 0..self.config.worker_count() {
            let op = slot.op.clone();
            let input = slot.input.clone();
            let encoder = slot.verify.as_ref().map(|setup| setup.encoder.clone());
            self.workers
                .push(tokio::spawn(worker::run_worker(ctx.clone(), op, input, encoder)));
        }

        self.ctx = ctx;
        self.state = RunState::Running;
        Ok(())
    }

    /// End the run: signal all workers, pin the elapsed time, and join each
    /// worker with a bounded timeout. A worker still busy after the timeout
    /// is left to drain on its own rather than being forcibly cancelled.
    ///
    /// Idempotent, and safe to call without a prior `start`.
    pub async fn stop(&mut self) {
        if self.state != RunState::Running {
            return;
        }

        self.ctx.halt();
        self.stats.freeze(self.clock.now());
        self.state = RunState::Stopped;

        for mut handle in self.workers.drain(..) {
            match timeout(WORKER_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("worker ended abnormally: {err}"),
                Err(_) => warn!(
                    "worker still busy after {:?}; abandoning it",
                    WORKER_JOIN_TIMEOUT
                ),
            }
        }

        info!("load run stopped");
    }
}
