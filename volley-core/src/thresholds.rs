use std::fmt;

use volley_metrics::MetricSnapshot;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
}

impl ThresholdOp {
    fn compare(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Lte => left <= right,
            Self::Gt => left > right,
            Self::Gte => left >= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    P(f64),
}

/// Metric a threshold reads from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMetric {
    /// Request latency in milliseconds.
    Latency,
    Iterations,
    Failed,
    Checks,
    Dropped,
    Status,
}

impl ThresholdMetric {
    /// Resolves a metric name; latency shorthands (`p95_latency_ms`) carry their aggregation.
    fn resolve(name: &str) -> Option<(Self, Option<ThresholdAgg>)> {
        let metric = match name {
            "http_req_duration" | "latency" | "latency_ms" => (Self::Latency, None),
            "http_reqs" | "iterations" => (Self::Iterations, None),
            "http_req_failed" => (Self::Failed, None),
            "checks" => (Self::Checks, None),
            "dropped_iterations" => (Self::Dropped, None),
            "status" => (Self::Status, None),
            _ => {
                let agg = name.strip_suffix("_latency_ms").and_then(parse_agg)?;
                (Self::Latency, Some(agg))
            }
        };
        Some(metric)
    }

    fn default_agg(self) -> Option<ThresholdAgg> {
        match self {
            Self::Iterations | Self::Dropped => Some(ThresholdAgg::Count),
            Self::Failed | Self::Checks => Some(ThresholdAgg::Rate),
            Self::Latency | Self::Status => None,
        }
    }

    fn accepts(self, agg: ThresholdAgg) -> bool {
        use ThresholdAgg as A;
        match self {
            Self::Latency => matches!(agg, A::Avg | A::Min | A::Max | A::Med | A::P(_)),
            Self::Iterations | Self::Dropped => matches!(agg, A::Count | A::Rate),
            Self::Failed | Self::Checks => matches!(agg, A::Rate),
            Self::Status => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdCheck {
    Compare {
        agg: ThresholdAgg,
        op: ThresholdOp,
        value: f64,
    },
    /// Every outcome's status code must be in the set.
    StatusIn(Vec<u16>),
}

/// A named pass/fail predicate over a [`MetricSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    pub metric: String,
    pub expression: String,
    target: ThresholdMetric,
    check: ThresholdCheck,
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

impl ThresholdSpec {
    /// Parses one expression for a metric, e.g. (`http_req_duration`, `p(95)<500`),
    /// (`p95_latency_ms`, `<500`) or (`status`, `in {200,429}`).
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let metric = metric.trim();
        let invalid = |reason: String| ConfigError::InvalidThreshold {
            metric: metric.to_string(),
            expression: expression.to_string(),
            reason,
        };

        let (target, fixed_agg) = ThresholdMetric::resolve(metric)
            .ok_or_else(|| invalid(format!("unknown metric `{metric}`")))?;

        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(invalid("empty threshold".to_string()));
        }

        let check = if target == ThresholdMetric::Status {
            ThresholdCheck::StatusIn(parse_status_set(&compact).map_err(invalid)?)
        } else {
            parse_compare(&compact, target, fixed_agg).map_err(invalid)?
        };

        Ok(Self {
            metric: metric.to_string(),
            expression: expression.trim().to_string(),
            target,
            check,
        })
    }

    /// Parses a single-line threshold: `metric: expr`, `status in {200,429}` or
    /// `p95_latency_ms < 500`.
    pub fn parse_line(line: &str) -> Result<Self, ConfigError> {
        let line = line.trim();
        if let Some((metric, expr)) = line.split_once(':') {
            return Self::parse(metric, expr);
        }
        if let Some(rest) = line.strip_prefix("status") {
            return Self::parse("status", rest);
        }

        let split = line
            .find(|c: char| matches!(c, '<' | '>' | '=' | '!') || c.is_whitespace())
            .unwrap_or(line.len());
        let (metric, expr) = line.split_at(split);
        Self::parse(metric, expr)
    }

    pub fn target(&self) -> ThresholdMetric {
        self.target
    }

    pub fn check(&self) -> &ThresholdCheck {
        &self.check
    }

    /// Value this threshold reads from `snapshot`, `None` when there is no data.
    pub fn observe(&self, snapshot: &MetricSnapshot) -> Option<f64> {
        match &self.check {
            ThresholdCheck::StatusIn(codes) => snapshot.status_fraction(codes),
            ThresholdCheck::Compare { agg, .. } => observe_agg(self.target, *agg, snapshot),
        }
    }
}

fn parse_agg(raw: &str) -> Option<ThresholdAgg> {
    let agg = match raw.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .or_else(|| other.strip_prefix('p'))?;
            let p: f64 = inner.parse().ok()?;
            ThresholdAgg::P(p)
        }
    };
    Some(agg)
}

fn parse_compare(
    s: &str,
    target: ThresholdMetric,
    fixed_agg: Option<ThresholdAgg>,
) -> Result<ThresholdCheck, String> {
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if right.is_empty() {
        return Err("missing value".to_string());
    }

    let agg = match (left.is_empty(), fixed_agg) {
        (true, Some(agg)) => agg,
        (true, None) => target
            .default_agg()
            .ok_or_else(|| "missing aggregation (e.g. `p(95)` or `avg`)".to_string())?,
        (false, Some(_)) => return Err(format!("unexpected aggregation `{left}`")),
        (false, None) => {
            parse_agg(left).ok_or_else(|| format!("unknown aggregation `{left}`"))?
        }
    };

    if let ThresholdAgg::P(p) = agg
        && !(p > 0.0 && p <= 100.0)
    {
        return Err(format!("percentile {p} out of range"));
    }
    if !target.accepts(agg) {
        return Err(format!("aggregation `{left}` does not apply to this metric"));
    }

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value `{right}`"))?;

    Ok(ThresholdCheck::Compare { agg, op, value })
}

fn parse_status_set(s: &str) -> Result<Vec<u16>, String> {
    let body = s
        .strip_prefix("in")
        .ok_or_else(|| "expected `in {code, ...}`".to_string())?;
    let inner = body
        .strip_prefix('{')
        .and_then(|v| v.strip_suffix('}'))
        .or_else(|| body.strip_prefix('[').and_then(|v| v.strip_suffix(']')))
        .ok_or_else(|| "expected a `{...}` status set".to_string())?;

    let codes = inner
        .split(',')
        .filter(|c| !c.is_empty())
        .map(|c| {
            c.parse::<u16>()
                .ok()
                .filter(|code| (100..=599).contains(code))
                .ok_or_else(|| format!("invalid status code `{c}`"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if codes.is_empty() {
        return Err("empty status set".to_string());
    }
    Ok(codes)
}

fn observe_agg(target: ThresholdMetric, agg: ThresholdAgg, s: &MetricSnapshot) -> Option<f64> {
    use ThresholdAgg as A;
    use ThresholdMetric as M;

    match (target, agg) {
        (M::Latency, A::Avg) => s.latency.mean,
        (M::Latency, A::Min) => s.latency.min,
        (M::Latency, A::Max) => s.latency.max,
        (M::Latency, A::Med) => s.latency_percentile_ms(50.0),
        (M::Latency, A::P(p)) => s.latency_percentile_ms(p),
        (M::Iterations, A::Count) => Some(s.iterations as f64),
        (M::Iterations, A::Rate) => Some(s.rate),
        (M::Failed, A::Rate) => s.failed_rate(),
        (M::Checks, A::Rate) => s.checks_rate(),
        (M::Dropped, A::Count) => Some(s.dropped_iterations as f64),
        (M::Dropped, A::Rate) => Some(s.dropped_rate()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub threshold: ThresholdSpec,
    pub passed: bool,
    pub observed: Option<f64>,
}

/// Evaluates every threshold against `snapshot`. A threshold without data fails.
#[must_use]
pub fn evaluate(thresholds: &[ThresholdSpec], snapshot: &MetricSnapshot) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|t| {
            let observed = t.observe(snapshot);
            let passed = match (&t.check, observed) {
                (_, None) => false,
                (ThresholdCheck::StatusIn(_), Some(fraction)) => fraction >= 1.0,
                (ThresholdCheck::Compare { op, value, .. }, Some(v)) => op.compare(v, *value),
            };
            ThresholdResult {
                threshold: t.clone(),
                passed,
                observed,
            }
        })
        .collect()
}

#[must_use]
pub fn all_passed(results: &[ThresholdResult]) -> bool {
    results.iter().all(|r| r.passed)
}
