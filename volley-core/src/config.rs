use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;

use crate::error::ConfigError;
use crate::thresholds::ThresholdSpec;

const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// Arrival model kind (the string form used by scenario documents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ArrivalModelKind {
    #[strum(serialize = "constant-arrival-rate")]
    ConstantArrivalRate,

    #[strum(serialize = "ramping-arrival-rate")]
    RampingArrivalRate,

    #[strum(to_string = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(to_string = "ramping-vus", serialize = "staged-ramp")]
    RampingVus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrivalModel {
    /// Open loop: `rate` iterations started per `time_unit`, regardless of completions.
    ConstantArrivalRate {
        rate: u64,
        time_unit: Duration,
        duration: Duration,
        pre_allocated_vus: u64,
        max_vus: u64,
    },

    /// Open loop with the rate linearly interpolated across stages.
    RampingArrivalRate {
        start_rate: u64,
        time_unit: Duration,
        stages: Vec<Stage>,
        pre_allocated_vus: u64,
        max_vus: u64,
    },

    /// Closed loop: a fixed population of VUs for `duration`.
    ConstantVus { vus: u64, duration: Duration },

    /// Closed loop with the VU count linearly interpolated across stages.
    RampingVus { start_vus: u64, stages: Vec<Stage> },
}

impl ArrivalModel {
    #[must_use]
    pub fn kind(&self) -> ArrivalModelKind {
        match self {
            Self::ConstantArrivalRate { .. } => ArrivalModelKind::ConstantArrivalRate,
            Self::RampingArrivalRate { .. } => ArrivalModelKind::RampingArrivalRate,
            Self::ConstantVus { .. } => ArrivalModelKind::ConstantVus,
            Self::RampingVus { .. } => ArrivalModelKind::RampingVus,
        }
    }

    #[must_use]
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::ConstantArrivalRate { duration, .. } | Self::ConstantVus { duration, .. } => {
                *duration
            }
            Self::RampingArrivalRate { stages, .. } | Self::RampingVus { stages, .. } => {
                stages_duration(stages)
            }
        }
    }

    /// `(pre_allocated, max)` worker slots for this model.
    #[must_use]
    pub fn pool_bounds(&self) -> (u64, u64) {
        match self {
            Self::ConstantArrivalRate {
                pre_allocated_vus,
                max_vus,
                ..
            }
            | Self::RampingArrivalRate {
                pre_allocated_vus,
                max_vus,
                ..
            } => (*pre_allocated_vus, *max_vus),
            Self::ConstantVus { vus, .. } => (*vus, *vus),
            Self::RampingVus { start_vus, stages } => {
                let max = stages
                    .iter()
                    .map(|s| s.target)
                    .max()
                    .unwrap_or(0)
                    .max(*start_vus);
                (*start_vus, max)
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => {
                if *rate == 0 {
                    return Err(ConfigError::InvalidRate);
                }
                if time_unit.is_zero() {
                    return Err(ConfigError::InvalidTimeUnit);
                }
                if duration.is_zero() {
                    return Err(ConfigError::InvalidDuration);
                }
                validate_vus_bounds(*pre_allocated_vus, *max_vus)
            }
            Self::RampingArrivalRate {
                time_unit,
                stages,
                pre_allocated_vus,
                max_vus,
                ..
            } => {
                if time_unit.is_zero() {
                    return Err(ConfigError::InvalidTimeUnit);
                }
                validate_stages(stages)?;
                validate_vus_bounds(*pre_allocated_vus, *max_vus)
            }
            Self::ConstantVus { vus, duration } => {
                if *vus == 0 {
                    return Err(ConfigError::InvalidVus);
                }
                if duration.is_zero() {
                    return Err(ConfigError::InvalidDuration);
                }
                Ok(())
            }
            Self::RampingVus { stages, .. } => {
                validate_stages(stages)?;
                if self.pool_bounds().1 == 0 {
                    return Err(ConfigError::InvalidVus);
                }
                Ok(())
            }
        }
    }
}

fn stages_duration(stages: &[Stage]) -> Duration {
    stages
        .iter()
        .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration))
}

fn validate_stages(stages: &[Stage]) -> Result<(), ConfigError> {
    if stages.is_empty() {
        return Err(ConfigError::InvalidStages);
    }
    if let Some(idx) = stages.iter().position(|s| s.duration.is_zero()) {
        return Err(ConfigError::InvalidStageDuration(idx + 1));
    }
    Ok(())
}

fn validate_vus_bounds(pre_allocated_vus: u64, max_vus: u64) -> Result<(), ConfigError> {
    if max_vus == 0 || max_vus < pre_allocated_vus {
        return Err(ConfigError::InvalidMaxVus);
    }
    Ok(())
}

/// Pacing delay between the end of one request and the release of its worker slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThinkTime {
    #[default]
    None,
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(d) => d,
            Self::Uniform { min, max } if min >= max => min,
            Self::Uniform { min, max } => {
                let min_ns = min.as_nanos().min(u64::MAX as u128) as u64;
                let max_ns = max.as_nanos().min(u64::MAX as u128) as u64;
                Duration::from_nanos(rng.random_range(min_ns..=max_ns))
            }
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// One request an iteration performs.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// If non-empty, the response status is checked against this set.
    pub expect_status: Vec<u16>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: http::Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            expect_status: Vec::new(),
        }
    }

    #[must_use]
    pub fn expect_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.expect_status = codes.into_iter().collect();
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let parsed =
            url::Url::parse(&self.url).map_err(|_| ConfigError::InvalidUrl(self.url.clone()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }
        for (k, v) in &self.headers {
            if http::header::HeaderName::from_bytes(k.as_bytes()).is_err()
                || http::header::HeaderValue::from_str(v).is_err()
            {
                return Err(ConfigError::InvalidHeader(k.clone()));
            }
        }
        Ok(())
    }
}

/// Immutable, validated description of one test run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: String,
    pub model: ArrivalModel,
    /// Iteration `seq` performs `requests[seq % requests.len()]`.
    pub requests: Vec<RequestSpec>,
    pub request_timeout: Duration,
    pub think_time: ThinkTime,
    /// Upper bound on the draining phase once dispatching stops.
    pub graceful_stop: Duration,
    pub seed: u64,
    /// Cancel the run after this many consecutive 5xx/network/timeout outcomes.
    pub abort_on_consecutive_failures: Option<u64>,
    pub thresholds: Vec<ThresholdSpec>,
}

impl ScenarioConfig {
    pub fn new(name: impl Into<String>, model: ArrivalModel, request: RequestSpec) -> Self {
        Self {
            name: name.into(),
            model,
            requests: vec![request],
            request_timeout: DEFAULT_TIMEOUT,
            think_time: ThinkTime::None,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            seed: 0,
            abort_on_consecutive_failures: None,
            thresholds: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;

        if self.requests.is_empty() {
            return Err(ConfigError::MissingRequest);
        }
        for r in &self.requests {
            r.validate()?;
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if let ThinkTime::Uniform { min, max } = self.think_time
            && min > max
        {
            return Err(ConfigError::InvalidThinkTime);
        }
        if self.abort_on_consecutive_failures == Some(0) {
            return Err(ConfigError::InvalidFailFast);
        }
        Ok(())
    }

    #[must_use]
    pub fn request_for(&self, seq: u64) -> Option<&RequestSpec> {
        if self.requests.is_empty() {
            return None;
        }
        let idx = (seq % self.requests.len() as u64) as usize;
        self.requests.get(idx)
    }

    /// Builds a validated scenario from raw document options, applying CLI overrides.
    pub fn from_options(opts: ScenarioOptions, cfg: RunConfig) -> Result<Self, ConfigError> {
        let executor_kind: ArrivalModelKind = match opts.executor.as_deref() {
            Some(name) => name
                .parse()
                .map_err(|_| ConfigError::InvalidExecutor(name.to_string()))?,
            None if !opts.stages.is_empty() && opts.start_rate.is_some() => {
                ArrivalModelKind::RampingArrivalRate
            }
            None if !opts.stages.is_empty() => ArrivalModelKind::RampingVus,
            None if opts.rate.is_some() => ArrivalModelKind::ConstantArrivalRate,
            None => ArrivalModelKind::ConstantVus,
        };

        if cfg.duration.is_some() && !opts.stages.is_empty() {
            return Err(ConfigError::DurationOverrideWithStages);
        }
        let duration = cfg.duration.or(opts.duration).unwrap_or(Duration::ZERO);
        let time_unit = opts.time_unit.unwrap_or(DEFAULT_TIME_UNIT);

        let (pre_allocated_vus, max_vus) = {
            let max_vus = opts.max_vus.or(opts.pre_allocated_vus).unwrap_or(1);
            let pre = opts.pre_allocated_vus.unwrap_or(max_vus.min(1));
            (pre, max_vus)
        };

        let model = match executor_kind {
            ArrivalModelKind::ConstantArrivalRate => ArrivalModel::ConstantArrivalRate {
                rate: opts.rate.unwrap_or(0),
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            },
            ArrivalModelKind::RampingArrivalRate => ArrivalModel::RampingArrivalRate {
                start_rate: opts.start_rate.unwrap_or(0),
                time_unit,
                stages: opts.stages,
                pre_allocated_vus,
                max_vus,
            },
            ArrivalModelKind::ConstantVus => ArrivalModel::ConstantVus {
                vus: opts.vus.unwrap_or(1),
                duration,
            },
            ArrivalModelKind::RampingVus => ArrivalModel::RampingVus {
                start_vus: opts.start_vus.unwrap_or(0),
                stages: opts.stages,
            },
        };

        let mut requests = Vec::with_capacity(opts.requests.len());
        for r in opts.requests {
            requests.push(r.into_spec(cfg.url.as_deref())?);
        }

        let mut thresholds = Vec::new();
        for set in &opts.thresholds {
            for expr in &set.expressions {
                thresholds.push(ThresholdSpec::parse(&set.metric, expr)?);
            }
        }

        let think_time = opts.think_time.unwrap_or_default();

        let config = Self {
            name: opts.name.unwrap_or_else(|| "default".to_string()),
            model,
            requests,
            request_timeout: cfg
                .timeout
                .or(opts.timeout)
                .unwrap_or(DEFAULT_TIMEOUT),
            think_time,
            graceful_stop: opts.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
            seed: opts.seed.unwrap_or(0),
            abort_on_consecutive_failures: opts.abort_on_consecutive_failures,
            thresholds,
        };

        config.validate()?;
        Ok(config)
    }
}

/// CLI overrides; they take precedence over document values.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub duration: Option<Duration>,
    pub url: Option<String>,
    pub timeout: Option<Duration>,
}

/// Raw scenario options as read from a scenario document, before validation.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    pub name: Option<String>,
    pub executor: Option<String>,

    pub rate: Option<u64>,
    pub time_unit: Option<Duration>,
    pub duration: Option<Duration>,
    pub vus: Option<u64>,
    pub stages: Vec<Stage>,
    pub start_vus: Option<u64>,
    pub start_rate: Option<u64>,
    pub pre_allocated_vus: Option<u64>,
    pub max_vus: Option<u64>,

    pub graceful_stop: Option<Duration>,
    pub think_time: Option<ThinkTime>,
    pub timeout: Option<Duration>,
    pub seed: Option<u64>,
    pub abort_on_consecutive_failures: Option<u64>,

    pub requests: Vec<RequestOptions>,
    pub thresholds: Vec<ThresholdSet>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Option<String>,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub expect_status: Vec<u16>,
}

impl RequestOptions {
    fn into_spec(self, url_override: Option<&str>) -> Result<RequestSpec, ConfigError> {
        let method = match self.method.as_deref() {
            None => http::Method::GET,
            Some(m) => http::Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| ConfigError::InvalidMethod(m.to_string()))?,
        };

        Ok(RequestSpec {
            method,
            url: url_override.map_or(self.url, str::to_string),
            headers: self.headers.into_iter().collect(),
            body: self.body.map(Bytes::from).unwrap_or_default(),
            expect_status: self.expect_status,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}
