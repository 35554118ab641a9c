use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use volley_core::{
    MetricSnapshot, OutcomeClass, ProgressFn, ProgressUpdate, RunReport, ScenarioConfig,
};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _scenario_path: &Path, _scenario: &ScenarioConfig) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u: ProgressUpdate| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        let line = build_summary_line(report);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub state: &'static str,
    pub elapsed_secs: f64,
    pub total_secs: f64,

    pub active_vus: u64,
    pub allocated_vus: u64,
    pub max_vus: u64,

    pub iterations: u64,
    pub dropped_iterations: u64,
    pub failed: u64,
    pub rate: f64,

    pub latency_p50: Option<f64>,
    pub latency_p95: Option<f64>,
    pub latency_p99: Option<f64>,

    pub thresholds_failing: usize,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    let s = &u.snapshot;

    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        state: u.state.into(),
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),

        active_vus: u.pool.active,
        allocated_vus: u.pool.allocated,
        max_vus: u.pool.max_vus,

        iterations: s.iterations,
        dropped_iterations: s.dropped_iterations,
        failed: s.classes.failed(),
        rate: s.rate,

        latency_p50: s.latency.p50,
        latency_p95: s.latency.p95,
        latency_p99: s.latency.p99,

        thresholds_failing: u.thresholds_failing,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub scenario: String,
    pub model: String,
    pub state: &'static str,
    pub cancel_reason: Option<String>,
    pub duration_secs: f64,

    pub iterations: u64,
    pub dropped_iterations: u64,
    pub interrupted_iterations: u64,
    pub classes: BTreeMap<&'static str, u64>,
    pub status_codes: BTreeMap<String, u64>,

    pub checks_passed: u64,
    pub checks_failed: u64,
    pub bytes_received: u64,

    pub rate: f64,
    pub rate_per_sec_avg: f64,
    pub rate_per_sec_stdev: f64,
    pub rate_per_sec_max: f64,

    pub latency: JsonLatencySummary,

    pub peak_vus: u64,
    pub allocated_vus: u64,
    pub max_vus: u64,

    pub thresholds_passed: bool,
    pub thresholds: Vec<JsonThresholdResult>,
}

/// Milliseconds.
#[derive(Debug, Serialize)]
pub(crate) struct JsonLatencySummary {
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

#[derive(Debug, Serialize)]
pub(crate) struct JsonThresholdResult {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
}

fn latency_summary(s: &MetricSnapshot) -> JsonLatencySummary {
    let l = &s.latency;
    JsonLatencySummary {
        count: l.count,
        min: l.min,
        max: l.max,
        mean: l.mean,
        stdev: l.stdev,
        p50: l.p50,
        p90: l.p90,
        p95: l.p95,
        p99: l.p99,
    }
}

fn build_summary_line(report: &RunReport) -> JsonSummaryLine {
    let s = &report.snapshot;

    let classes = OutcomeClass::ALL
        .iter()
        .map(|c| (<&'static str>::from(*c), s.classes.get(*c)))
        .collect();

    let status_codes = s
        .status_codes
        .iter()
        .map(|(code, n)| (code.to_string(), *n))
        .collect();

    let thresholds = report
        .thresholds
        .iter()
        .map(|r| JsonThresholdResult {
            metric: r.threshold.metric.clone(),
            expression: r.threshold.expression.clone(),
            passed: r.passed,
            observed: r.observed,
        })
        .collect();

    JsonSummaryLine {
        kind: "summary",
        scenario: report.scenario.clone(),
        model: report.model.to_string(),
        state: report.state.into(),
        cancel_reason: report.cancel_reason.clone(),
        duration_secs: report.duration.as_secs_f64(),

        iterations: s.iterations,
        dropped_iterations: s.dropped_iterations,
        interrupted_iterations: s.interrupted_iterations,
        classes,
        status_codes,

        checks_passed: s.checks_passed,
        checks_failed: s.checks_failed,
        bytes_received: s.bytes_received,

        rate: s.rate,
        rate_per_sec_avg: s.rate_summary.avg,
        rate_per_sec_stdev: s.rate_summary.stdev,
        rate_per_sec_max: s.rate_summary.max,

        latency: latency_summary(s),

        peak_vus: report.pool.peak_active,
        allocated_vus: report.pool.allocated,
        max_vus: report.pool.max_vus,

        thresholds_passed: report.thresholds_passed(),
        thresholds,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
