mod arrival;
mod config;
mod context;
mod error;
mod executor;
mod pool;
mod progress;
mod run;
mod schedule;
mod scheduler;
mod thresholds;

pub mod http;

pub use arrival::{ArrivalOffsets, ConstantOffsets, RampingOffsets};
pub use config::{
    ArrivalModel, ArrivalModelKind, RequestOptions, RequestSpec, RunConfig, ScenarioConfig,
    ScenarioOptions, Stage, ThinkTime, ThresholdSet,
};
pub use context::{OutcomeSink, RunContext, RunState};
pub use error::{ConfigError, Error, Result};
pub use executor::{IterationMeta, RequestExecutor};
pub use pool::{PoolStats, Slot, WorkerPool};
pub use progress::{ProgressFn, ProgressUpdate};
pub use run::{RunReport, run_scenario};
pub use schedule::RampSchedule;
pub use scheduler::{DispatchEvent, DispatchStream, Scheduler, SchedulerStats};
pub use thresholds::{
    ThresholdAgg, ThresholdCheck, ThresholdMetric, ThresholdOp, ThresholdResult, ThresholdSpec,
    all_passed, evaluate,
};

pub use volley_metrics::{MetricSnapshot, Outcome, OutcomeClass};
