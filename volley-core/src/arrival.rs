use std::time::Duration;

use crate::config::{ArrivalModel, Stage};

/// Lazy, time-ordered dispatch offsets (relative to run start) for an open-loop model.
#[derive(Debug, Clone)]
pub enum ArrivalOffsets {
    Constant(ConstantOffsets),
    Ramping(RampingOffsets),
}

impl ArrivalOffsets {
    /// `None` for closed-loop models, which are paced by worker availability instead.
    pub fn for_model(model: &ArrivalModel) -> Option<Self> {
        match model {
            ArrivalModel::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                ..
            } => Some(Self::Constant(ConstantOffsets::new(
                *rate, *time_unit, *duration,
            ))),
            ArrivalModel::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                ..
            } => Some(Self::Ramping(RampingOffsets::new(
                *start_rate,
                *time_unit,
                stages.clone(),
            ))),
            ArrivalModel::ConstantVus { .. } | ArrivalModel::RampingVus { .. } => None,
        }
    }
}

impl Iterator for ArrivalOffsets {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        match self {
            Self::Constant(c) => c.next(),
            Self::Ramping(r) => r.next(),
        }
    }
}

/// `n * time_unit / rate` for `n = 0, 1, ..` while the offset is below `duration`.
///
/// Offsets are computed from `n` in integer nanoseconds, so there is no drift over long runs.
#[derive(Debug, Clone)]
pub struct ConstantOffsets {
    n: u128,
    rate: u128,
    time_unit_ns: u128,
    duration_ns: u128,
}

impl ConstantOffsets {
    pub fn new(rate: u64, time_unit: Duration, duration: Duration) -> Self {
        Self {
            n: 0,
            rate: u128::from(rate),
            time_unit_ns: time_unit.as_nanos(),
            duration_ns: duration.as_nanos(),
        }
    }
}

impl Iterator for ConstantOffsets {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.rate == 0 {
            return None;
        }
        let offset_ns = self.n.saturating_mul(self.time_unit_ns) / self.rate;
        if offset_ns >= self.duration_ns {
            return None;
        }
        self.n += 1;
        Some(Duration::from_nanos(offset_ns.min(u128::from(u64::MAX)) as u64))
    }
}

/// Offsets for a rate that ramps linearly between stage targets.
///
/// Iteration `k` is dispatched when the integrated rate first reaches `k + 1`.
#[derive(Debug, Clone)]
pub struct RampingOffsets {
    start_rate: f64,
    time_unit_s: f64,
    stages: Vec<Stage>,
    total: Duration,

    next_k: u64,
    stage_idx: usize,
    stage_start_s: f64,
    cum_before_stage: f64,
}

impl RampingOffsets {
    pub fn new(start_rate: u64, time_unit: Duration, stages: Vec<Stage>) -> Self {
        let total = stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration));
        Self {
            start_rate: start_rate as f64,
            time_unit_s: time_unit.as_secs_f64(),
            stages,
            total,
            next_k: 0,
            stage_idx: 0,
            stage_start_s: 0.0,
            cum_before_stage: 0.0,
        }
    }

    fn stage_rates(&self, idx: usize) -> (f64, f64) {
        let r0 = if idx == 0 {
            self.start_rate
        } else {
            self.stages[idx - 1].target as f64
        };
        (r0, self.stages[idx].target as f64)
    }
}

impl Iterator for RampingOffsets {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.time_unit_s <= 0.0 {
            return None;
        }
        let want = (self.next_k + 1) as f64;

        while self.stage_idx < self.stages.len() {
            let (r0, r1) = self.stage_rates(self.stage_idx);
            let d = self.stages[self.stage_idx].duration.as_secs_f64();

            // Iterations per second at the stage start, and the quadratic term of C(t).
            let a = r0 / self.time_unit_s;
            let b = if d > 0.0 {
                (r1 - r0) / (2.0 * d * self.time_unit_s)
            } else {
                0.0
            };
            let stage_total = (r0 + r1) / 2.0 * d / self.time_unit_s;
            let m = want - self.cum_before_stage;

            if m <= stage_total + 1e-9 {
                // Solves a*t + b*t^2 = m in the numerically stable form.
                let disc = (a * a + 4.0 * b * m).max(0.0);
                let denom = a + disc.sqrt();
                if denom > 0.0 {
                    let t = (2.0 * m / denom).clamp(0.0, d);
                    let offset = Duration::from_secs_f64(self.stage_start_s + t);
                    if offset >= self.total {
                        return None;
                    }
                    self.next_k += 1;
                    return Some(offset);
                }
            }

            self.cum_before_stage += stage_total;
            self.stage_start_s += d;
            self.stage_idx += 1;
        }

        None
    }
}
