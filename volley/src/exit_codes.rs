use volley_core::RunReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// The run was cancelled (fail-fast or Ctrl-C); the report covers a partial run.
    Cancelled = 13,

    /// Invalid CLI/config/options (bad flags, malformed scenario, invalid threshold syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, failed worker tasks).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Cancellation wins over threshold failures: a partial run's thresholds are not meaningful.
    #[must_use]
    pub fn from_outcome(cancelled: bool, thresholds_failed: bool) -> Self {
        match (cancelled, thresholds_failed) {
            (true, _) => Self::Cancelled,
            (false, true) => Self::ThresholdsFailed,
            (false, false) => Self::Success,
        }
    }

    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        Self::from_outcome(report.cancelled(), !report.thresholds_passed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_takes_precedence() {
        assert_eq!(ExitCode::from_outcome(true, true), ExitCode::Cancelled);
        assert_eq!(ExitCode::from_outcome(true, false), ExitCode::Cancelled);
        assert_eq!(ExitCode::from_outcome(false, true), ExitCode::ThresholdsFailed);
        assert_eq!(ExitCode::from_outcome(false, false), ExitCode::Success);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::ThresholdsFailed.as_i32(), 11);
        assert_eq!(ExitCode::Cancelled.as_i32(), 13);
        assert_eq!(ExitCode::InvalidInput.as_i32(), 30);
        assert_eq!(ExitCode::RuntimeError.as_i32(), 40);
    }
}
