use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use volley_core::{
    ArrivalModel, RequestOptions, RequestSpec, ScenarioConfig, ScenarioOptions, Stage, ThinkTime,
    ThresholdSet, ThresholdSpec,
};

/// A scenario document. Keys follow the load-tester vocabulary (`preAllocatedVUs`, `timeUnit`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// constant-arrival-rate | ramping-arrival-rate | constant-vus | ramping-vus
    #[serde(alias = "model", skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,

    // constant-arrival-rate / ramping-arrival-rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_rate: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_unit: Option<YamlDuration>,

    #[serde(rename = "preAllocatedVUs")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_allocated_vus: Option<u64>,

    #[serde(rename = "maxVUs")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_vus: Option<u64>,

    // constant-vus / ramping-vus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vus: Option<u64>,

    #[serde(rename = "startVUs")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_vus: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<YamlDuration>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stages: Vec<StageYaml>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub graceful_stop: Option<YamlDuration>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub think_time: Option<ThinkTimeYaml>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout: Option<YamlDuration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_on_consecutive_failures: Option<u64>,

    /// Shorthand for a single GET request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestYaml>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub requests: Vec<RequestYaml>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<ThresholdsYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    pub url: String,

    #[serde(
        skip_serializing_if = "BTreeMap::is_empty",
        default,
        deserialize_with = "deserialize_headers"
    )]
    pub headers: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub expect_status: Vec<u16>,
}

/// `thinkTime: 1s` or `thinkTime: { min: 500ms, max: 2s }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThinkTimeYaml {
    Fixed(YamlDuration),
    Range { min: YamlDuration, max: YamlDuration },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdsYaml {
    /// `{ metric: expr }` or `{ metric: [expr, ...] }`.
    Map(BTreeMap<String, ThresholdExprYaml>),
    /// `["status in {200,429}", "p95_latency_ms < 500"]`.
    Lines(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl From<Duration> for YamlDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl Serialize for YamlDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Header values may be written as plain YAML scalars (`X-Retry: 3`).
fn deserialize_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;

    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => return Err(D::Error::custom(format!("header `{k}` must be a scalar"))),
        };
        out.insert(k, s);
    }

    Ok(out)
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

pub(crate) fn parse_scenario_doc(path: &Path, bytes: &[u8]) -> anyhow::Result<ScenarioDoc> {
    if is_json_path(path) {
        serde_json::from_slice(bytes)
            .with_context(|| format!("failed to parse JSON: {}", path.display()))
    } else {
        serde_yaml::from_slice(bytes)
            .with_context(|| format!("failed to parse YAML: {}", path.display()))
    }
}

pub(crate) async fn load_scenario_options(path: &Path) -> anyhow::Result<ScenarioOptions> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read scenario: {}", path.display()))?;

    let doc = parse_scenario_doc(path, &bytes)?;
    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string);

    scenario_doc_into_options(doc, default_name)
}

fn scenario_doc_into_options(
    doc: ScenarioDoc,
    default_name: Option<String>,
) -> anyhow::Result<ScenarioOptions> {
    let ScenarioDoc {
        name,
        executor,
        rate,
        start_rate,
        time_unit,
        pre_allocated_vus,
        max_vus,
        vus,
        start_vus,
        duration,
        stages,
        graceful_stop,
        think_time,
        timeout,
        seed,
        abort_on_consecutive_failures,
        url,
        request,
        requests,
        thresholds,
    } = doc;

    let sources = usize::from(url.is_some())
        + usize::from(request.is_some())
        + usize::from(!requests.is_empty());
    if sources > 1 {
        anyhow::bail!("set only one of `url`, `request` or `requests`");
    }

    let requests = match (url, request) {
        (Some(url), _) => vec![RequestOptions {
            url,
            ..RequestOptions::default()
        }],
        (None, Some(r)) => vec![request_yaml_into_options(r)],
        (None, None) => requests.into_iter().map(request_yaml_into_options).collect(),
    };

    let think_time = think_time.map(|t| match t {
        ThinkTimeYaml::Fixed(d) => ThinkTime::Fixed(d.into_inner()),
        ThinkTimeYaml::Range { min, max } => ThinkTime::Uniform {
            min: min.into_inner(),
            max: max.into_inner(),
        },
    });

    Ok(ScenarioOptions {
        name: name.or(default_name),
        executor,
        rate,
        time_unit: time_unit.map(YamlDuration::into_inner),
        duration: duration.map(YamlDuration::into_inner),
        vus,
        stages: stages
            .into_iter()
            .map(|s| Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect(),
        start_vus,
        start_rate,
        pre_allocated_vus,
        max_vus,
        graceful_stop: graceful_stop.map(YamlDuration::into_inner),
        think_time,
        timeout: timeout.map(YamlDuration::into_inner),
        seed,
        abort_on_consecutive_failures,
        requests,
        thresholds: parse_thresholds(thresholds)?,
    })
}

fn request_yaml_into_options(r: RequestYaml) -> RequestOptions {
    RequestOptions {
        method: r.method,
        url: r.url,
        headers: r.headers,
        body: r.body,
        expect_status: r.expect_status,
    }
}

fn parse_thresholds(raw: Option<ThresholdsYaml>) -> anyhow::Result<Vec<ThresholdSet>> {
    let mut out = Vec::new();

    match raw {
        None => {}
        Some(ThresholdsYaml::Map(map)) => {
            for (metric, v) in map {
                let expressions = match v {
                    ThresholdExprYaml::One(s) => vec![s],
                    ThresholdExprYaml::Many(v) => v,
                };

                if expressions.is_empty() {
                    anyhow::bail!("invalid thresholds for `{metric}`: empty list");
                }

                out.push(ThresholdSet {
                    metric,
                    expressions,
                });
            }
        }
        Some(ThresholdsYaml::Lines(lines)) => {
            for line in lines {
                let spec = ThresholdSpec::parse_line(&line)?;
                out.push(ThresholdSet {
                    metric: spec.metric,
                    expressions: vec![spec.expression],
                });
            }
        }
    }

    Ok(out)
}

/// Renders a validated scenario back into document form, with every default made explicit.
pub(crate) fn build_doc_from_resolved_scenario(s: &ScenarioConfig) -> ScenarioDoc {
    let stages = |stages: &[Stage]| {
        stages
            .iter()
            .map(|st| StageYaml {
                duration: YamlDuration::from(st.duration),
                target: st.target,
            })
            .collect::<Vec<_>>()
    };

    let mut doc = ScenarioDoc {
        name: Some(s.name.clone()),
        executor: Some(s.model.kind().to_string()),
        graceful_stop: Some(s.graceful_stop.into()),
        timeout: Some(s.request_timeout.into()),
        seed: Some(s.seed),
        abort_on_consecutive_failures: s.abort_on_consecutive_failures,
        think_time: match s.think_time {
            ThinkTime::None => None,
            ThinkTime::Fixed(d) => Some(ThinkTimeYaml::Fixed(d.into())),
            ThinkTime::Uniform { min, max } => Some(ThinkTimeYaml::Range {
                min: min.into(),
                max: max.into(),
            }),
        },
        requests: s.requests.iter().map(request_spec_to_yaml).collect(),
        thresholds: render_thresholds(&s.thresholds),
        ..ScenarioDoc::default()
    };

    match &s.model {
        ArrivalModel::ConstantArrivalRate {
            rate,
            time_unit,
            duration,
            pre_allocated_vus,
            max_vus,
        } => {
            doc.rate = Some(*rate);
            doc.time_unit = Some((*time_unit).into());
            doc.duration = Some((*duration).into());
            doc.pre_allocated_vus = Some(*pre_allocated_vus);
            doc.max_vus = Some(*max_vus);
        }
        ArrivalModel::RampingArrivalRate {
            start_rate,
            time_unit,
            stages: st,
            pre_allocated_vus,
            max_vus,
        } => {
            doc.start_rate = Some(*start_rate);
            doc.time_unit = Some((*time_unit).into());
            doc.stages = stages(st);
            doc.pre_allocated_vus = Some(*pre_allocated_vus);
            doc.max_vus = Some(*max_vus);
        }
        ArrivalModel::ConstantVus { vus, duration } => {
            doc.vus = Some(*vus);
            doc.duration = Some((*duration).into());
        }
        ArrivalModel::RampingVus {
            start_vus,
            stages: st,
        } => {
            doc.start_vus = Some(*start_vus);
            doc.stages = stages(st);
        }
    }

    doc
}

fn request_spec_to_yaml(r: &RequestSpec) -> RequestYaml {
    RequestYaml {
        method: Some(r.method.to_string()),
        url: r.url.clone(),
        headers: r.headers.iter().cloned().collect(),
        body: (!r.body.is_empty()).then(|| String::from_utf8_lossy(&r.body).into_owned()),
        expect_status: r.expect_status.clone(),
    }
}

fn render_thresholds(specs: &[ThresholdSpec]) -> Option<ThresholdsYaml> {
    if specs.is_empty() {
        return None;
    }

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for t in specs {
        grouped
            .entry(t.metric.clone())
            .or_default()
            .push(t.expression.clone());
    }

    let map = grouped
        .into_iter()
        .map(|(metric, mut exprs)| {
            let v = if exprs.len() == 1 {
                ThresholdExprYaml::One(exprs.remove(0))
            } else {
                ThresholdExprYaml::Many(exprs)
            };
            (metric, v)
        })
        .collect();

    Some(ThresholdsYaml::Map(map))
}
