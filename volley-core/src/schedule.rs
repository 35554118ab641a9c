use std::time::Duration;

use crate::config::Stage;

const MAX_RECHECK: Duration = Duration::from_millis(50);

/// Piecewise-linear target over a list of stages, starting from `start`.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

struct StagePos {
    stage_start: Duration,
    stage_duration: Duration,
    start_target: u64,
    end_target: u64,
}

impl RampSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    /// A single flat stage holding `target` for `duration`.
    pub fn constant(target: u64, duration: Duration) -> Self {
        Self::new(target, vec![Stage { duration, target }])
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    fn position(&self, elapsed: Duration) -> Option<StagePos> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let idx = if elapsed >= total {
            self.stages.len() - 1
        } else {
            // First stage whose end is strictly after `elapsed`.
            self.cumulative_ends.partition_point(|end| *end <= elapsed)
        };

        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };

        Some(StagePos {
            stage_start,
            stage_duration: self.stages[idx].duration,
            start_target,
            end_target: self.stages[idx].target,
        })
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(pos) = self.position(elapsed) else {
            return self.start;
        };
        if elapsed >= self.total_duration() {
            return pos.end_target;
        }
        if pos.stage_duration.is_zero() {
            return pos.end_target;
        }

        let start_i = pos.start_target as i128;
        let delta = pos.end_target as i128 - start_i;
        let num = elapsed.saturating_sub(pos.stage_start).as_nanos() as i128;
        let den = pos.stage_duration.as_nanos() as i128;

        let cur = start_i + delta.saturating_mul(num) / den.max(1);
        cur.clamp(0, u64::MAX as i128) as u64
    }

    /// How long a waiter may sleep before the target should be re-read.
    pub fn next_recheck_in(&self, elapsed: Duration) -> Duration {
        let total = self.total_duration();
        if elapsed >= total {
            return Duration::ZERO;
        }

        match self.position(elapsed) {
            Some(pos) if pos.start_target == pos.end_target => {
                let stage_end = pos.stage_start.saturating_add(pos.stage_duration);
                stage_end.saturating_sub(elapsed).min(MAX_RECHECK.saturating_mul(4))
            }
            _ => MAX_RECHECK.min(total.saturating_sub(elapsed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> RampSchedule {
        RampSchedule::new(
            0,
            vec![
                Stage {
                    duration: Duration::from_secs(30),
                    target: 20,
                },
                Stage {
                    duration: Duration::from_secs(60),
                    target: 20,
                },
                Stage {
                    duration: Duration::from_secs(30),
                    target: 0,
                },
            ],
        )
    }

    #[test]
    fn interpolates_linearly_within_stages() {
        let s = ramp();
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(Duration::from_secs(15)), 10);
        assert_eq!(s.target_at(Duration::from_secs(30)), 20);
        assert_eq!(s.target_at(Duration::from_secs(60)), 20);
        assert_eq!(s.target_at(Duration::from_secs(105)), 10);
        assert_eq!(s.target_at(Duration::from_secs(500)), 0);
        assert_eq!(s.total_duration(), Duration::from_secs(120));
    }

    #[test]
    fn constant_schedule_is_flat() {
        let s = RampSchedule::constant(4, Duration::from_secs(2));
        assert_eq!(s.target_at(Duration::ZERO), 4);
        assert_eq!(s.target_at(Duration::from_secs(1)), 4);
        assert!(s.is_done(Duration::from_secs(2)));
        assert!(s.next_recheck_in(Duration::from_secs(1)) <= Duration::from_millis(200));
    }

    #[test]
    fn recheck_never_overshoots_the_end() {
        let s = RampSchedule::constant(1, Duration::from_millis(30));
        assert!(s.next_recheck_in(Duration::from_millis(10)) <= Duration::from_millis(20));
        assert_eq!(s.next_recheck_in(Duration::from_millis(30)), Duration::ZERO);
    }
}
