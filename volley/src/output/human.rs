use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod format;
mod progress;
mod summary;

use format::{format_duration_single, format_ms_opt, format_rate};
use progress::HumanProgress;
use summary::render;
use volley_core::{ArrivalModel, ProgressFn, ProgressUpdate, RunReport, ScenarioConfig};

use super::OutputFormatter;

#[cfg(test)]
pub(crate) use summary::tests::sample_report;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

fn describe_model(model: &ArrivalModel) -> String {
    match model {
        ArrivalModel::ConstantArrivalRate {
            rate,
            time_unit,
            duration,
            pre_allocated_vus,
            max_vus,
        } => format!(
            "rate={rate}/{} duration={} vus={pre_allocated_vus}..{max_vus}",
            humantime::format_duration(*time_unit),
            humantime::format_duration(*duration)
        ),
        ArrivalModel::RampingArrivalRate {
            start_rate,
            time_unit,
            stages,
            pre_allocated_vus,
            max_vus,
        } => format!(
            "start_rate={start_rate}/{} stages={} vus={pre_allocated_vus}..{max_vus}",
            humantime::format_duration(*time_unit),
            stages.len()
        ),
        ArrivalModel::ConstantVus { vus, duration } => format!(
            "vus={vus} duration={}",
            humantime::format_duration(*duration)
        ),
        ArrivalModel::RampingVus { start_vus, stages } => {
            format!("start_vus={start_vus} stages={}", stages.len())
        }
    }
}

/// Turns cumulative counters into per-interval deltas between progress ticks.
#[derive(Default)]
struct Deltas {
    iterations: u64,
    failed: u64,
    at: Duration,
}

fn progress_message(u: &ProgressUpdate, prev: &mut Deltas) -> String {
    let s = &u.snapshot;
    let failed_total = s.classes.failed();

    let dt = u.elapsed.saturating_sub(prev.at).as_secs_f64().max(1e-9);
    let iters_per_sec = s.iterations.saturating_sub(prev.iterations) as f64 / dt;
    let failed_delta = failed_total.saturating_sub(prev.failed);

    *prev = Deltas {
        iterations: s.iterations,
        failed: failed_total,
        at: u.elapsed,
    };

    let mut msg = format!(
        "vus={}/{} elapsed={} iters/s={} p95={} errors={failed_delta}/{failed_total}",
        u.pool.active,
        u.pool.max_vus,
        format_duration_single(u.elapsed),
        format_rate(iters_per_sec),
        format_ms_opt(s.latency.p95),
    );

    if s.dropped_iterations > 0 {
        msg.push_str(&format!(" dropped={}", s.dropped_iterations));
    }
    if u.thresholds_failing > 0 {
        msg.push_str(&format!(" thresholds_failing={}", u.thresholds_failing));
    }
    msg
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, scenario_path: &Path, scenario: &ScenarioConfig) {
        println!("scenario file: {}", scenario_path.display());
        println!(
            "scenario: {} model={} {}",
            scenario.name,
            scenario.model.kind(),
            describe_model(&scenario.model)
        );
        for r in &scenario.requests {
            println!("  {} {}", r.method, r.url);
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        let prev = Mutex::new(Deltas::default());

        Some(Arc::new(move |u: ProgressUpdate| {
            let message = {
                let mut prev = prev.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                progress_message(&u, &mut prev)
            };
            progress.update(&u.state.to_string(), u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        let failed: Vec<_> = report.thresholds.iter().filter(|r| !r.passed).collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for r in failed {
                match r.observed {
                    Some(obs) => eprintln!("  {} (observed {obs})", r.threshold),
                    None => eprintln!("  {} (no data)", r.threshold),
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_core::{PoolStats, RunState};

    #[test]
    fn progress_message_reports_interval_deltas() {
        let report = sample_report(&[]);
        let mut prev = Deltas::default();

        let update = ProgressUpdate {
            tick: 2,
            elapsed: Duration::from_secs(2),
            total_duration: Duration::from_secs(10),
            state: RunState::Running,
            pool: PoolStats {
                active: 1,
                allocated: 2,
                peak_active: 2,
                max_vus: 5,
            },
            snapshot: report.snapshot,
            thresholds_failing: 1,
        };

        let msg = progress_message(&update, &mut prev);
        assert!(msg.contains("vus=1/5"), "{msg}");
        assert!(msg.contains("iters/s=4.00"), "{msg}");
        assert!(msg.contains("errors=2/2"), "{msg}");
        assert!(msg.contains("dropped=3"), "{msg}");
        assert!(msg.contains("thresholds_failing=1"), "{msg}");

        let again = progress_message(&update, &mut prev);
        assert!(again.contains("errors=0/2"), "{again}");
    }

    #[test]
    fn describes_each_model() {
        let text = describe_model(&ArrivalModel::ConstantArrivalRate {
            rate: 100,
            time_unit: Duration::from_secs(60),
            duration: Duration::from_secs(60),
            pre_allocated_vus: 10,
            max_vus: 50,
        });
        assert_eq!(text, "rate=100/1m duration=1m vus=10..50");

        let text = describe_model(&ArrivalModel::ConstantVus {
            vus: 3,
            duration: Duration::from_secs(5),
        });
        assert_eq!(text, "vus=3 duration=5s");
    }
}
