use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use volley_metrics::MetricSnapshot;

use crate::context::{RunContext, RunState};
use crate::pool::{PoolStats, WorkerPool};
use crate::thresholds::{ThresholdSpec, evaluate};

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub state: RunState,
    pub pool: PoolStats,
    pub snapshot: MetricSnapshot,
    /// Thresholds that would fail if the run ended now.
    pub thresholds_failing: usize,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

pub(crate) struct ProgressReporter {
    pub ctx: Arc<RunContext>,
    pub pool: Arc<WorkerPool>,
    pub total_duration: Duration,
    pub thresholds: Vec<ThresholdSpec>,
    pub interval: Duration,
}

impl ProgressReporter {
    /// Emits an update every `interval` until the returned handle is aborted.
    pub(crate) fn spawn(self, progress: ProgressFn) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            let mut tick = 0u64;
            loop {
                interval.tick().await;
                tick += 1;

                let elapsed = self.ctx.elapsed();
                self.ctx.metrics().extend_horizon(elapsed);
                let snapshot = self.ctx.metrics().snapshot();
                let thresholds_failing = evaluate(&self.thresholds, &snapshot)
                    .iter()
                    .filter(|r| !r.passed)
                    .count();

                progress(ProgressUpdate {
                    tick,
                    elapsed,
                    total_duration: self.total_duration,
                    state: self.ctx.state(),
                    pool: self.pool.stats(),
                    snapshot,
                    thresholds_failing,
                });
            }
        })
    }
}
