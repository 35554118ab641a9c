use std::collections::BTreeMap;
use std::time::Duration;

/// Welford accumulator for mean/stdev/max.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }

        self.n = self.n.saturating_add(1);
        let n_f = self.n as f64;

        let delta = x - self.mean;
        self.mean += delta / n_f;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;

        if x > self.max {
            self.max = x;
        }
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stdev(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        (self.m2 / (self.n as f64 - 1.0)).sqrt()
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateSummary {
    pub avg: f64,
    pub stdev: f64,
    pub max: f64,
}

/// Completed-iteration counts bucketed by whole second of completion time.
///
/// Buckets are keyed by the outcome's own timestamp, so out-of-order ingestion lands in the
/// right bucket. Only the most recent `capacity` seconds are kept.
#[derive(Debug, Clone)]
pub struct RateSeries {
    buckets: BTreeMap<u64, u64>,
    capacity: usize,
}

impl Default for RateSeries {
    fn default() -> Self {
        Self::with_capacity(3600)
    }
}

impl RateSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, at: Duration) {
        let sec = at.as_secs();

        // Late arrivals older than the retained window are ignored.
        if self.buckets.len() >= self.capacity
            && let Some((&oldest, _)) = self.buckets.first_key_value()
            && sec < oldest
        {
            return;
        }

        *self.buckets.entry(sec).or_insert(0) += 1;

        while self.buckets.len() > self.capacity {
            self.buckets.pop_first();
        }
    }

    /// Dense `(second, count)` pairs from the first to the last non-empty bucket.
    pub fn points(&self) -> Vec<(u64, u64)> {
        let (Some((&first, _)), Some((&last, _))) =
            (self.buckets.first_key_value(), self.buckets.last_key_value())
        else {
            return Vec::new();
        };

        (first..=last)
            .map(|sec| (sec, self.buckets.get(&sec).copied().unwrap_or(0)))
            .collect()
    }

    pub fn summary(&self) -> RateSummary {
        let mut stats = RunningStats::default();
        for (_, count) in self.points() {
            stats.push(count as f64);
        }

        if stats.count() == 0 {
            return RateSummary::default();
        }

        RateSummary {
            avg: stats.mean(),
            stdev: stats.stdev(),
            max: stats.max(),
        }
    }
}
