pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid scenario: {0}")]
    Config(#[from] ConfigError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("run already started (state: {0})")]
    AlreadyStarted(crate::RunState),
}

/// Malformed scenario. Always reported before a run starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "invalid `executor` `{0}` (expected `constant-arrival-rate`, `ramping-arrival-rate`, `constant-vus`, or `ramping-vus`)"
    )]
    InvalidExecutor(String),

    #[error("`rate` must be a positive integer")]
    InvalidRate,

    #[error("`timeUnit` must be a positive duration")]
    InvalidTimeUnit,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`maxVUs` must be >= `preAllocatedVUs` and at least 1")]
    InvalidMaxVus,

    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    InvalidStages,

    #[error("stage #{0} must have a positive duration")]
    InvalidStageDuration(usize),

    #[error("`--duration` cannot override a staged scenario")]
    DurationOverrideWithStages,

    #[error("scenario has no request (set `url`, `request`, or `requests`)")]
    MissingRequest,

    #[error("invalid request url `{0}` (expected http:// or https://)")]
    InvalidUrl(String),

    #[error("invalid request method `{0}`")]
    InvalidMethod(String),

    #[error("invalid request header `{0}`")]
    InvalidHeader(String),

    #[error("`timeout` must be a positive duration")]
    InvalidTimeout,

    #[error("`thinkTime` range must satisfy min <= max")]
    InvalidThinkTime,

    #[error("`abortOnConsecutiveFailures` must be a positive integer")]
    InvalidFailFast,

    #[error("invalid threshold `{metric}: {expression}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },
}
