use hdrhistogram::Histogram;

/// Upper bound: 1 hour in microseconds. Larger values saturate to the bound.
const MAX_LATENCY_US: u64 = 3_600_000_000;

pub(crate) fn new_latency_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(1, MAX_LATENCY_US, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

pub(crate) fn clamp_us(us: u64) -> u64 {
    us.clamp(1, MAX_LATENCY_US)
}

/// Latency distribution summary in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

pub(crate) fn percentile_ms(h: &Histogram<u64>, p: f64) -> Option<f64> {
    if h.is_empty() || !p.is_finite() {
        return None;
    }
    let q = (p / 100.0).clamp(0.0, 1.0);
    Some(us_to_ms(h.value_at_quantile(q) as f64))
}

pub(crate) fn summarize(h: &Histogram<u64>) -> LatencySummary {
    let count = h.len();
    if count == 0 {
        return LatencySummary::default();
    }

    LatencySummary {
        count,
        min: Some(us_to_ms(h.min() as f64)),
        max: Some(us_to_ms(h.max() as f64)),
        mean: Some(us_to_ms(h.mean())),
        stdev: Some(us_to_ms(h.stdev())),
        p50: percentile_ms(h, 50.0),
        p90: percentile_ms(h, 90.0),
        p95: percentile_ms(h, 95.0),
        p99: percentile_ms(h, 99.0),
    }
}

fn us_to_ms(us: f64) -> f64 {
    us / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_stats() {
        let s = summarize(&new_latency_histogram());
        assert_eq!(s.count, 0);
        assert!(s.p95.is_none());
        assert!(s.mean.is_none());
    }

    #[test]
    fn summary_is_reported_in_milliseconds() {
        let mut h = new_latency_histogram();
        for us in [10_000u64, 20_000, 30_000] {
            let _ = h.record(us);
        }

        let s = summarize(&h);
        assert_eq!(s.count, 3);
        assert_eq!(s.min, Some(10.0));
        let max = s.max.unwrap_or_default();
        assert!((max - 30.0).abs() < 0.1, "max={max}");
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert_eq!(clamp_us(0), 1);
        assert_eq!(clamp_us(u64::MAX), MAX_LATENCY_US);
    }
}
