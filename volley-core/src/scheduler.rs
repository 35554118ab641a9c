use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::arrival::ArrivalOffsets;
use crate::config::ArrivalModel;
use crate::context::RunContext;
use crate::pool::{Slot, WorkerPool};
use crate::schedule::RampSchedule;

/// One iteration that should begin now. The slot it carries is already claimed.
#[derive(Debug)]
pub struct DispatchEvent {
    pub seq: u64,
    /// Scheduled offset from run start.
    pub due: Duration,
    pub slot: Slot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub dropped: u64,
    /// Dispatched events still queued when the stream was closed.
    pub undelivered: u64,
}

/// Receiving end of the scheduler. Yields `None` once the schedule is exhausted or the run
/// was cancelled.
#[derive(Debug)]
pub struct DispatchStream {
    rx: mpsc::Receiver<DispatchEvent>,
    task: JoinHandle<SchedulerStats>,
}

impl DispatchStream {
    pub async fn next(&mut self) -> Option<DispatchEvent> {
        self.rx.recv().await
    }

    /// Closes the stream, waits for the scheduler task to exit and returns its counters.
    pub async fn finish(self) -> crate::Result<SchedulerStats> {
        let Self { mut rx, task } = self;
        rx.close();
        let mut undelivered = 0;
        while rx.try_recv().is_ok() {
            undelivered += 1;
        }

        let mut stats = task.await?;
        stats.undelivered = undelivered;
        Ok(stats)
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Spawns the scheduler for `model` and returns the stream of dispatch events.
    ///
    /// Open-loop models never wait for a slot: if the pool is at capacity when an arrival is
    /// due, the arrival is dropped and counted. Closed-loop models wait for a slot below the
    /// current target concurrency.
    pub fn start(ctx: Arc<RunContext>, model: &ArrivalModel, pool: Arc<WorkerPool>) -> DispatchStream {
        let capacity = usize::try_from(pool.max_vus()).unwrap_or(usize::MAX).clamp(1, 4096);
        let (tx, rx) = mpsc::channel(capacity);
        let started = ctx.started_at().unwrap_or_else(Instant::now);

        let task = match (ArrivalOffsets::for_model(model), model) {
            (Some(offsets), _) => {
                tokio::spawn(run_open_loop(ctx, offsets, pool, tx, started))
            }
            (None, ArrivalModel::RampingVus { start_vus, stages }) => {
                let schedule = RampSchedule::new(*start_vus, stages.clone());
                tokio::spawn(run_closed_loop(ctx, schedule, pool, tx, started))
            }
            (None, _) => {
                let (vus, _) = model.pool_bounds();
                let schedule = RampSchedule::constant(vus, model.total_duration());
                tokio::spawn(run_closed_loop(ctx, schedule, pool, tx, started))
            }
        };

        DispatchStream { rx, task }
    }
}

async fn run_open_loop(
    ctx: Arc<RunContext>,
    offsets: ArrivalOffsets,
    pool: Arc<WorkerPool>,
    tx: mpsc::Sender<DispatchEvent>,
    started: Instant,
) -> SchedulerStats {
    let mut stats = SchedulerStats::default();
    let mut seq = 0u64;

    for due in offsets {
        let deadline = tokio::time::Instant::from_std(started + due);
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let Some(slot) = pool.try_acquire() else {
            stats.dropped += 1;
            ctx.metrics().record_dropped(1);
            tracing::debug!(seq, ?due, "all worker slots busy; dropping iteration");
            seq += 1;
            continue;
        };

        match tx.try_send(DispatchEvent { seq, due, slot }) {
            Ok(()) => stats.dispatched += 1,
            Err(TrySendError::Full(ev)) => {
                drop(ev);
                stats.dropped += 1;
                ctx.metrics().record_dropped(1);
                tracing::debug!(seq, ?due, "dispatch queue full; dropping iteration");
            }
            Err(TrySendError::Closed(_)) => break,
        }
        seq += 1;
    }

    tracing::debug!(
        dispatched = stats.dispatched,
        dropped = stats.dropped,
        "open-loop scheduler finished"
    );
    stats
}

async fn run_closed_loop(
    ctx: Arc<RunContext>,
    schedule: RampSchedule,
    pool: Arc<WorkerPool>,
    tx: mpsc::Sender<DispatchEvent>,
    started: Instant,
) -> SchedulerStats {
    let mut stats = SchedulerStats::default();

    loop {
        let elapsed = started.elapsed();
        if ctx.is_cancelled() || schedule.is_done(elapsed) {
            break;
        }

        let target = schedule.target_at(elapsed);
        let recheck = schedule.next_recheck_in(elapsed);

        let acquired = tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            res = tokio::time::timeout(recheck, pool.acquire_below(target)) => res,
        };
        // Timed out: the target may have changed, re-read it.
        let Ok(slot) = acquired else {
            continue;
        };

        let due = started.elapsed();
        if ctx.is_cancelled() || schedule.is_done(due) {
            break;
        }

        let seq = stats.dispatched;
        if tx.send(DispatchEvent { seq, due, slot }).await.is_err() {
            break;
        }
        stats.dispatched += 1;
    }

    tracing::debug!(dispatched = stats.dispatched, "closed-loop scheduler finished");
    stats
}
