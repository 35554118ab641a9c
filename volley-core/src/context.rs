use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use volley_metrics::{Aggregator, Outcome};

use crate::config::ScenarioConfig;
use crate::error::{Error, Result};

/// Lifecycle of one run.
///
/// `Configured -> Running -> Draining -> Completed`, with `Cancelled` as the alternate
/// terminal state reachable from `Running` or `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Configured,
    Running,
    Draining,
    Completed,
    Cancelled,
}

impl RunState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Configured => 0,
            Self::Running => 1,
            Self::Draining => 2,
            Self::Completed => 3,
            Self::Cancelled => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Configured,
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Completed,
            _ => Self::Cancelled,
        }
    }
}

/// One-shot broadcast flag.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    fired: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Returns `true` for the call that actually fired the signal.
    fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        self.notify.notify_waiters();
        first
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// Receives every outcome produced during a run, exactly once per executed iteration.
pub trait OutcomeSink: Send + Sync {
    fn emit(&self, outcome: Outcome);
}

/// Run-scoped state shared by the scheduler, the workers and the caller.
///
/// Nothing here is global: several runs can coexist in one process, each with its own context.
#[derive(Debug)]
pub struct RunContext {
    started: OnceLock<Instant>,
    state: AtomicU8,
    stop: Signal,
    abort: Signal,
    cancel_reason: Mutex<Option<String>>,
    metrics: Arc<Aggregator>,
    seed: u64,
    fail_fast_after: Option<u64>,
    consecutive_failures: AtomicU64,
}

impl RunContext {
    #[must_use]
    pub fn new(seed: u64, fail_fast_after: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            started: OnceLock::new(),
            state: AtomicU8::new(RunState::Configured.as_u8()),
            stop: Signal::default(),
            abort: Signal::default(),
            cancel_reason: Mutex::new(None),
            metrics: Arc::new(Aggregator::default()),
            seed,
            fail_fast_after,
            consecutive_failures: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn for_scenario(config: &ScenarioConfig) -> Arc<Self> {
        Self::new(config.seed, config.abort_on_consecutive_failures)
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> &Arc<Aggregator> {
        &self.metrics
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Moves `Configured -> Running` and starts the run clock.
    pub(crate) fn start(&self) -> Result<Instant> {
        if !self.transition(RunState::Configured, RunState::Running) {
            return Err(Error::AlreadyStarted(self.state()));
        }
        let now = Instant::now();
        Ok(*self.started.get_or_init(|| now))
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started.get().copied()
    }

    /// Time since the run clock started (zero before start).
    pub fn elapsed(&self) -> Duration {
        self.started
            .get()
            .map(Instant::elapsed)
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) fn begin_drain(&self) -> bool {
        self.transition(RunState::Running, RunState::Draining)
    }

    /// Moves to the terminal state. `Cancelled` wins if a stop was ever requested.
    pub(crate) fn finish(&self) -> RunState {
        let target = if self.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };

        for from in [RunState::Configured, RunState::Running, RunState::Draining] {
            if self.transition(from, target) {
                return target;
            }
        }
        self.state()
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Graceful stop: the scheduler stops dispatching and in-flight iterations finish.
    ///
    /// Has no effect once the run reached a terminal state. Returns `true` for the call that
    /// actually requested the stop.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        if self.state().is_terminal() {
            return false;
        }

        {
            let mut slot = self.cancel_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.stop.fire()
    }

    /// Hard stop: like [`Self::cancel`], and in-flight iterations are abandoned.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.cancel(reason);
        self.abort.fire()
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.is_fired()
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.lock().clone()
    }

    pub async fn cancelled(&self) {
        self.stop.wait().await;
    }

    pub async fn aborted(&self) {
        self.abort.wait().await;
    }

    fn track_failure_streak(&self, outcome: &Outcome) {
        let Some(limit) = self.fail_fast_after else {
            return;
        };

        if !outcome.class.is_fatal_signal() {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return;
        }

        let streak = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= limit
            && self.cancel(format!("{streak} consecutive failed iterations"))
        {
            tracing::warn!(
                streak,
                class = %outcome.class,
                "fail-fast limit reached; cancelling run"
            );
        }
    }
}

impl OutcomeSink for RunContext {
    fn emit(&self, outcome: Outcome) {
        self.metrics.ingest(&outcome);
        self.track_failure_streak(&outcome);
    }
}
