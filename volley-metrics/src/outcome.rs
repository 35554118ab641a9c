use std::sync::Arc;
use std::time::Duration;

/// Normalized result class of one executed iteration.
///
/// Every outcome lands in exactly one class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum OutcomeClass {
    /// 1xx/2xx/3xx response.
    SuccessStatus,
    /// 4xx response (rate limiting with 429 included).
    ClientErrorStatus,
    /// 5xx (or otherwise out of range) response.
    ServerErrorStatus,
    /// Connection refused/reset, DNS failure, TLS failure, body read failure.
    NetworkError,
    /// The per-request timeout elapsed before a response arrived.
    Timeout,
}

impl OutcomeClass {
    pub const ALL: [Self; 5] = [
        Self::SuccessStatus,
        Self::ClientErrorStatus,
        Self::ServerErrorStatus,
        Self::NetworkError,
        Self::Timeout,
    ];

    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            0..=399 => Self::SuccessStatus,
            400..=499 => Self::ClientErrorStatus,
            _ => Self::ServerErrorStatus,
        }
    }

    /// Short label used by the status-class histogram.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::SuccessStatus => "2xx",
            Self::ClientErrorStatus => "4xx",
            Self::ServerErrorStatus => "5xx",
            Self::NetworkError => "error",
            Self::Timeout => "timeout",
        }
    }

    #[must_use]
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::SuccessStatus)
    }

    /// Failures that indicate the target is unhealthy (as opposed to answering with a 4xx).
    #[must_use]
    pub fn is_fatal_signal(self) -> bool {
        matches!(
            self,
            Self::ServerErrorStatus | Self::NetworkError | Self::Timeout
        )
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::SuccessStatus => 0,
            Self::ClientErrorStatus => 1,
            Self::ServerErrorStatus => 2,
            Self::NetworkError => 3,
            Self::Timeout => 4,
        }
    }
}

/// Result of one executed iteration. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Dispatch sequence number of the iteration that produced this outcome.
    pub seq: u64,
    /// Worker slot (virtual user) that executed the iteration.
    pub vu: u64,
    pub class: OutcomeClass,
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
    /// Transport error kind, if no response was received.
    pub error: Option<Arc<str>>,
    /// Request start, as an offset from the run start.
    pub started_at: Duration,
    pub latency: Duration,
    pub bytes_received: u64,
    /// Status expectation result, if the request declared one.
    pub check: Option<bool>,
}

impl Outcome {
    #[must_use]
    pub fn response(seq: u64, vu: u64, status: u16, started_at: Duration, latency: Duration) -> Self {
        Self {
            seq,
            vu,
            class: OutcomeClass::from_status(status),
            status: Some(status),
            error: None,
            started_at,
            latency,
            bytes_received: 0,
            check: None,
        }
    }

    #[must_use]
    pub fn failure(
        seq: u64,
        vu: u64,
        class: OutcomeClass,
        error: impl Into<Arc<str>>,
        started_at: Duration,
        latency: Duration,
    ) -> Self {
        Self {
            seq,
            vu,
            class,
            status: None,
            error: Some(error.into()),
            started_at,
            latency,
            bytes_received: 0,
            check: None,
        }
    }

    #[must_use]
    pub fn with_bytes_received(mut self, bytes: u64) -> Self {
        self.bytes_received = bytes;
        self
    }

    #[must_use]
    pub fn with_check(mut self, passed: bool) -> Self {
        self.check = Some(passed);
        self
    }

    /// Completion instant, as an offset from the run start.
    #[must_use]
    pub fn completed_at(&self) -> Duration {
        self.started_at.saturating_add(self.latency)
    }
}
