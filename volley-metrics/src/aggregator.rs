use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::latency::{LatencySummary, clamp_us, new_latency_histogram, percentile_ms, summarize};
use crate::outcome::{Outcome, OutcomeClass};
use crate::series::{RateSeries, RateSummary};

#[derive(Debug)]
struct AggState {
    classes: ClassCounts,
    status_codes: BTreeMap<u16, u64>,
    checks_passed: u64,
    checks_failed: u64,
    dropped_iterations: u64,
    interrupted_iterations: u64,
    bytes_received: u64,
    latency_us: Histogram<u64>,
    series: RateSeries,
    horizon: Duration,
}

impl Default for AggState {
    fn default() -> Self {
        Self {
            classes: ClassCounts::default(),
            status_codes: BTreeMap::new(),
            checks_passed: 0,
            checks_failed: 0,
            dropped_iterations: 0,
            interrupted_iterations: 0,
            bytes_received: 0,
            latency_us: new_latency_histogram(),
            series: RateSeries::default(),
            horizon: Duration::ZERO,
        }
    }
}

/// Streaming aggregate of every outcome ingested during a run.
///
/// All fields live behind one lock, so an outcome becomes visible to [`Self::snapshot`]
/// in every field at once. Memory use does not grow with the number of outcomes.
#[derive(Debug, Default)]
pub struct Aggregator {
    state: Mutex<AggState>,
}

impl Aggregator {
    pub fn ingest(&self, outcome: &Outcome) {
        let us = u64::try_from(outcome.latency.as_micros()).unwrap_or(u64::MAX);
        let completed_at = outcome.completed_at();

        let mut st = self.state.lock();
        *st.classes.get_mut(outcome.class) += 1;

        if let Some(status) = outcome.status {
            *st.status_codes.entry(status).or_insert(0) += 1;
        }

        match outcome.check {
            Some(true) => st.checks_passed += 1,
            Some(false) => st.checks_failed += 1,
            None => {}
        }

        st.bytes_received = st.bytes_received.saturating_add(outcome.bytes_received);
        let _ = st.latency_us.record(clamp_us(us));
        st.series.record(completed_at);
        st.horizon = st.horizon.max(completed_at);
    }

    pub fn record_dropped(&self, n: u64) {
        self.state.lock().dropped_iterations += n;
    }

    pub fn record_interrupted(&self, n: u64) {
        self.state.lock().interrupted_iterations += n;
    }

    /// Extends the time span the aggregate covers (used for rates) to at least `elapsed`.
    pub fn extend_horizon(&self, elapsed: Duration) {
        let mut st = self.state.lock();
        st.horizon = st.horizon.max(elapsed);
    }

    pub fn iterations_total(&self) -> u64 {
        self.state.lock().classes.total()
    }

    pub fn dropped_total(&self) -> u64 {
        self.state.lock().dropped_iterations
    }

    /// Point-in-time copy of the aggregate. Later ingestion never mutates a returned snapshot.
    pub fn snapshot(&self) -> MetricSnapshot {
        let st = self.state.lock();
        let histogram = Arc::new(st.latency_us.clone());
        let iterations = st.classes.total();
        let elapsed = st.horizon;
        let rate = if elapsed.is_zero() {
            0.0
        } else {
            iterations as f64 / elapsed.as_secs_f64()
        };

        MetricSnapshot {
            elapsed,
            iterations,
            dropped_iterations: st.dropped_iterations,
            interrupted_iterations: st.interrupted_iterations,
            classes: st.classes,
            status_codes: st.status_codes.clone(),
            checks_passed: st.checks_passed,
            checks_failed: st.checks_failed,
            bytes_received: st.bytes_received,
            latency: summarize(&histogram),
            rate,
            rate_summary: st.series.summary(),
            rate_series: st.series.points(),
            histogram,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub success_status: u64,
    pub client_error_status: u64,
    pub server_error_status: u64,
    pub network_error: u64,
    pub timeout: u64,
}

impl ClassCounts {
    #[must_use]
    pub fn get(&self, class: OutcomeClass) -> u64 {
        match class {
            OutcomeClass::SuccessStatus => self.success_status,
            OutcomeClass::ClientErrorStatus => self.client_error_status,
            OutcomeClass::ServerErrorStatus => self.server_error_status,
            OutcomeClass::NetworkError => self.network_error,
            OutcomeClass::Timeout => self.timeout,
        }
    }

    fn get_mut(&mut self, class: OutcomeClass) -> &mut u64 {
        match class {
            OutcomeClass::SuccessStatus => &mut self.success_status,
            OutcomeClass::ClientErrorStatus => &mut self.client_error_status,
            OutcomeClass::ServerErrorStatus => &mut self.server_error_status,
            OutcomeClass::NetworkError => &mut self.network_error,
            OutcomeClass::Timeout => &mut self.timeout,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        OutcomeClass::ALL.iter().map(|c| self.get(*c)).sum()
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.total().saturating_sub(self.success_status)
    }
}

/// Aggregate view of all outcomes ingested up to the moment it was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    /// Time span covered by the aggregate (latest completion or run clock, whichever is later).
    pub elapsed: Duration,
    pub iterations: u64,
    pub dropped_iterations: u64,
    pub interrupted_iterations: u64,
    pub classes: ClassCounts,
    pub status_codes: BTreeMap<u16, u64>,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub bytes_received: u64,
    pub latency: LatencySummary,
    /// Completed iterations per second over `elapsed`.
    pub rate: f64,
    pub rate_summary: RateSummary,
    pub rate_series: Vec<(u64, u64)>,
    histogram: Arc<Histogram<u64>>,
}

impl MetricSnapshot {
    /// Latency at an arbitrary percentile (0..=100), in milliseconds.
    #[must_use]
    pub fn latency_percentile_ms(&self, p: f64) -> Option<f64> {
        percentile_ms(&self.histogram, p)
    }

    /// Fraction of outcomes that were not success-status.
    #[must_use]
    pub fn failed_rate(&self) -> Option<f64> {
        ratio(self.classes.failed(), self.iterations)
    }

    /// Fraction of declared checks that passed.
    #[must_use]
    pub fn checks_rate(&self) -> Option<f64> {
        ratio(
            self.checks_passed,
            self.checks_passed.saturating_add(self.checks_failed),
        )
    }

    /// Fraction of outcomes whose status code is one of `codes`. Transport failures never match.
    #[must_use]
    pub fn status_fraction(&self, codes: &[u16]) -> Option<f64> {
        let matching: u64 = self
            .status_codes
            .iter()
            .filter(|(code, _)| codes.contains(code))
            .map(|(_, n)| *n)
            .sum();
        ratio(matching, self.iterations)
    }

    /// Per-second rate of dropped iterations over `elapsed`.
    #[must_use]
    pub fn dropped_rate(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.dropped_iterations as f64 / self.elapsed.as_secs_f64()
    }
}

fn ratio(hits: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(seq: u64, status: u16, latency_ms: u64) -> Outcome {
        Outcome::response(
            seq,
            1,
            status,
            Duration::from_millis(seq * 100),
            Duration::from_millis(latency_ms),
        )
    }

    #[test]
    fn snapshot_is_idempotent_without_ingest() {
        let agg = Aggregator::default();
        agg.ingest(&ok(0, 200, 10));
        agg.ingest(&ok(1, 429, 20));
        agg.record_dropped(2);

        let a = agg.snapshot();
        let b = agg.snapshot();
        assert_eq!(a, b);
    }

    #[test]
    fn snapshot_is_not_mutated_by_later_ingest() {
        let agg = Aggregator::default();
        agg.ingest(&ok(0, 200, 10));
        let before = agg.snapshot();

        agg.ingest(&ok(1, 200, 10));
        assert_eq!(before.iterations, 1);
        assert_eq!(agg.snapshot().iterations, 2);
    }

    #[test]
    fn classes_and_raw_codes_are_counted() {
        let agg = Aggregator::default();
        agg.ingest(&ok(0, 200, 1));
        agg.ingest(&ok(1, 429, 1));
        agg.ingest(&ok(2, 429, 1));
        agg.ingest(&ok(3, 503, 1));
        agg.ingest(&Outcome::failure(
            4,
            1,
            OutcomeClass::Timeout,
            "timeout",
            Duration::ZERO,
            Duration::from_millis(5),
        ));

        let s = agg.snapshot();
        assert_eq!(s.iterations, 5);
        assert_eq!(s.classes.success_status, 1);
        assert_eq!(s.classes.client_error_status, 2);
        assert_eq!(s.classes.server_error_status, 1);
        assert_eq!(s.classes.timeout, 1);
        assert_eq!(s.status_codes.get(&429), Some(&2));
        assert_eq!(s.failed_rate(), Some(0.8));
        assert_eq!(s.status_fraction(&[200, 429]), Some(0.6));
    }

    #[test]
    fn rate_uses_outcome_timestamps() {
        let agg = Aggregator::default();
        for seq in 0..10 {
            agg.ingest(&ok(seq, 200, 0));
        }
        // Latest completion is at 900ms; the run clock says 2s.
        agg.extend_horizon(Duration::from_secs(2));

        let s = agg.snapshot();
        assert!((s.rate - 5.0).abs() < 1e-9, "rate={}", s.rate);
    }

    #[test]
    fn checks_rate_counts_only_declared_checks() {
        let agg = Aggregator::default();
        agg.ingest(&ok(0, 200, 1).with_check(true));
        agg.ingest(&ok(1, 500, 1).with_check(false));
        agg.ingest(&ok(2, 200, 1));

        let s = agg.snapshot();
        assert_eq!(s.checks_rate(), Some(0.5));
    }

    #[test]
    fn concurrent_ingest_loses_no_updates() {
        let agg = Arc::new(Aggregator::default());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        agg.ingest(&ok(t * 1000 + i, 200, 1));
                    }
                })
            })
            .collect();
        for t in threads {
            let _ = t.join();
        }

        let s = agg.snapshot();
        assert_eq!(s.iterations, 8000);
        assert_eq!(s.latency.count, 8000);
        assert_eq!(s.status_codes.get(&200), Some(&8000));
    }

    #[test]
    fn snapshots_stay_consistent_under_concurrent_ingest() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let agg = Arc::new(Aggregator::default());
        let stop = Arc::new(AtomicBool::new(false));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let agg = agg.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut seq = t * 1_000_000;
                    while !stop.load(Ordering::Relaxed) {
                        agg.ingest(&ok(seq % 1000, 429, 1));
                        seq += 1;
                    }
                })
            })
            .collect();

        for _ in 0..2000 {
            let s = agg.snapshot();
            let coded: u64 = s.status_codes.values().sum();
            assert_eq!(s.iterations, s.latency.count);
            assert_eq!(s.iterations, coded);
            assert_eq!(s.iterations, s.classes.client_error_status);
            if let Some(f) = s.status_fraction(&[429]) {
                assert!(f <= 1.0, "status fraction {f}");
            }
        }

        stop.store(true, Ordering::Relaxed);
        for w in writers {
            let _ = w.join();
        }
    }
}
