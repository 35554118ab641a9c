pub mod aggregator;
pub mod latency;
pub mod outcome;
pub mod series;

pub use aggregator::{Aggregator, ClassCounts, MetricSnapshot};
pub use latency::LatencySummary;
pub use outcome::{Outcome, OutcomeClass};
pub use series::{RateSeries, RateSummary, RunningStats};
