use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use volley_metrics::MetricSnapshot;

use crate::config::{ArrivalModelKind, ScenarioConfig};
use crate::context::{RunContext, RunState};
use crate::error::{Error, Result};
use crate::executor::{IterationMeta, RequestExecutor};
use crate::http::HttpClient;
use crate::pool::{PoolStats, WorkerPool};
use crate::progress::{ProgressFn, ProgressReporter};
use crate::scheduler::{DispatchEvent, Scheduler, SchedulerStats};
use crate::thresholds::{ThresholdResult, all_passed, evaluate};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Final result of a run: the last snapshot plus per-threshold verdicts.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub scenario: String,
    pub model: ArrivalModelKind,
    pub state: RunState,
    pub cancel_reason: Option<String>,
    pub duration: Duration,
    pub snapshot: MetricSnapshot,
    pub thresholds: Vec<ThresholdResult>,
    pub pool: PoolStats,
    pub scheduler: SchedulerStats,
}

impl RunReport {
    #[must_use]
    pub fn thresholds_passed(&self) -> bool {
        all_passed(&self.thresholds)
    }

    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.state == RunState::Cancelled
    }
}

/// Runs one scenario to completion (or cancellation) and returns its report.
///
/// A cancelled run still produces a report over whatever was measured up to that point.
pub async fn run_scenario(
    config: &ScenarioConfig,
    ctx: Arc<RunContext>,
    progress: Option<ProgressFn>,
) -> Result<RunReport> {
    config.validate()?;

    let (pre_allocated_vus, max_vus) = config.model.pool_bounds();
    let pool = WorkerPool::new(pre_allocated_vus, max_vus);
    let executor = Arc::new(RequestExecutor::new(
        HttpClient::default(),
        config.think_time,
        ctx.seed(),
    ));
    let shared = Arc::new(config.clone());
    let total_duration = config.model.total_duration();

    let run_started = ctx.start()?;
    tracing::info!(
        scenario = %config.name,
        model = %config.model.kind(),
        duration = ?total_duration,
        pre_allocated_vus,
        max_vus,
        "run started"
    );

    let progress_task = progress.map(|f| {
        ProgressReporter {
            ctx: ctx.clone(),
            pool: pool.clone(),
            total_duration,
            thresholds: config.thresholds.clone(),
            interval: PROGRESS_INTERVAL,
        }
        .spawn(f)
    });

    let mut stream = Scheduler::start(ctx.clone(), &config.model, pool.clone());
    let mut workers: JoinSet<()> = JoinSet::new();

    let mut not_started = 0u64;
    let dispatched = async {
        loop {
            tokio::select! {
                biased;
                _ = ctx.aborted() => break,
                Some(res) = workers.join_next(), if !workers.is_empty() => check_join(res)?,
                ev = stream.next() => match ev {
                    Some(ev) => match admit(ev, &ctx) {
                        Some(ev) => spawn_worker(&mut workers, ev, &ctx, &executor, &shared, run_started),
                        None => not_started += 1,
                    },
                    None => break,
                },
            }
        }
        Ok::<(), Error>(())
    }
    .await;
    if not_started > 0 {
        ctx.metrics().record_interrupted(not_started);
        tracing::debug!(not_started, "queued iterations discarded after cancel");
    }
    if let Err(err) = dispatched {
        ctx.abort("worker failed");
        return Err(err);
    }

    ctx.begin_drain();
    tracing::info!(in_flight = workers.len(), "dispatch finished; draining");

    let drained = tokio::select! {
        biased;
        _ = ctx.aborted() => false,
        res = tokio::time::timeout(config.graceful_stop, drain(&mut workers)) => match res {
            Ok(res) => {
                res?;
                true
            }
            Err(_) => false,
        },
    };

    if !drained {
        let interrupted = interrupt(&mut workers).await;
        ctx.metrics().record_interrupted(interrupted);
        tracing::warn!(
            interrupted,
            graceful_stop = ?config.graceful_stop,
            "in-flight iterations interrupted"
        );
    }

    let scheduler = stream.finish().await?;
    if scheduler.undelivered > 0 {
        ctx.metrics().record_interrupted(scheduler.undelivered);
    }

    if let Some(task) = progress_task {
        task.abort();
    }

    ctx.metrics().extend_horizon(ctx.elapsed());
    let snapshot = ctx.metrics().snapshot();
    let thresholds = evaluate(&config.thresholds, &snapshot);
    let state = ctx.finish();

    tracing::info!(
        %state,
        iterations = snapshot.iterations,
        dropped = snapshot.dropped_iterations,
        interrupted = snapshot.interrupted_iterations,
        thresholds_passed = all_passed(&thresholds),
        "run finished"
    );

    Ok(RunReport {
        scenario: config.name.clone(),
        model: config.model.kind(),
        state,
        cancel_reason: ctx.cancel_reason(),
        duration: ctx.elapsed(),
        snapshot,
        thresholds,
        pool: pool.stats(),
        scheduler,
    })
}

/// Events still queued when the run was cancelled are discarded, releasing their slot.
fn admit(ev: DispatchEvent, ctx: &RunContext) -> Option<DispatchEvent> {
    (!ctx.is_cancelled()).then_some(ev)
}

fn spawn_worker(
    workers: &mut JoinSet<()>,
    ev: DispatchEvent,
    ctx: &Arc<RunContext>,
    executor: &Arc<RequestExecutor>,
    config: &Arc<ScenarioConfig>,
    run_started: std::time::Instant,
) {
    let ctx = ctx.clone();
    let executor = executor.clone();
    let config = config.clone();

    workers.spawn(async move {
        let DispatchEvent { seq, slot, .. } = ev;
        let Some(req) = config.request_for(seq) else {
            return;
        };
        let meta = IterationMeta {
            seq,
            vu: slot.id(),
            run_started,
        };
        executor
            .execute(req, config.request_timeout, meta, ctx.as_ref())
            .await;
        drop(slot);
    });
}

fn check_join(res: std::result::Result<(), JoinError>) -> Result<()> {
    match res {
        Ok(()) => Ok(()),
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn drain(workers: &mut JoinSet<()>) -> Result<()> {
    while let Some(res) = workers.join_next().await {
        check_join(res)?;
    }
    Ok(())
}

/// Aborts whatever is still running and returns how many iterations were cut short.
async fn interrupt(workers: &mut JoinSet<()>) -> u64 {
    workers.abort_all();
    let mut interrupted = 0;
    while let Some(res) = workers.join_next().await {
        if matches!(&res, Err(e) if e.is_cancelled()) {
            interrupted += 1;
        }
    }
    interrupted
}
