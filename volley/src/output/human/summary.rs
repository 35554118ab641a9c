use std::fmt::Write as _;

use volley_core::{OutcomeClass, RunReport, ThresholdResult};

use super::format::*;

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();
    let s = &report.snapshot;

    out.push_str("summary\n");
    writeln!(&mut out, "scenario: {} ({})", report.scenario, report.model).ok();

    match &report.cancel_reason {
        Some(reason) => writeln!(&mut out, "  state: {} ({reason})", report.state).ok(),
        None => writeln!(&mut out, "  state: {}", report.state).ok(),
    };
    writeln!(
        &mut out,
        "  duration: {}",
        humantime::format_duration(truncate_to_millis(report.duration))
    )
    .ok();

    writeln!(
        &mut out,
        "  iterations: {} (dropped {}, interrupted {})",
        s.iterations, s.dropped_iterations, s.interrupted_iterations
    )
    .ok();
    writeln!(
        &mut out,
        "  rate: {}/s (per-second avg={} stdev={} max={})",
        format_rate(s.rate),
        format_rate(s.rate_summary.avg),
        format_rate(s.rate_summary.stdev),
        format_rate(s.rate_summary.max)
    )
    .ok();
    writeln!(
        &mut out,
        "  failed: {} ({})",
        s.classes.failed(),
        format_percent(s.failed_rate())
    )
    .ok();
    writeln!(&mut out, "  bytes: recv {}", format_bytes(s.bytes_received)).ok();
    writeln!(
        &mut out,
        "  vus: peak {} / max {} (allocated {})",
        report.pool.peak_active, report.pool.max_vus, report.pool.allocated
    )
    .ok();

    if s.checks_passed > 0 || s.checks_failed > 0 {
        writeln!(
            &mut out,
            "  checks: pass={} fail={} ({})",
            s.checks_passed,
            s.checks_failed,
            format_percent(s.checks_rate())
        )
        .ok();
    }

    if s.latency.count > 0 {
        writeln!(
            &mut out,
            "  latency = p50={} p90={} p95={} p99={} mean={} max={} (n={})",
            format_ms_opt(s.latency.p50),
            format_ms_opt(s.latency.p90),
            format_ms_opt(s.latency.p95),
            format_ms_opt(s.latency.p99),
            format_ms_opt(s.latency.mean),
            format_ms_opt(s.latency.max),
            s.latency.count
        )
        .ok();
    } else {
        out.push_str("  latency: n/a\n");
    }

    out.push_str("\nclasses\n");
    for class in OutcomeClass::ALL {
        let n = s.classes.get(class);
        if n > 0 {
            writeln!(&mut out, "  {class} [{}]: {n}", class.label()).ok();
        }
    }

    if !s.status_codes.is_empty() {
        out.push_str("\nstatus codes\n");
        for (code, n) in &s.status_codes {
            writeln!(&mut out, "  {code}: {n}").ok();
        }
    }

    if !report.thresholds.is_empty() {
        out.push_str("\nthresholds\n");
        for r in &report.thresholds {
            render_threshold(r, &mut out);
        }
    }

    out
}

fn render_threshold(r: &ThresholdResult, out: &mut String) {
    let status = if r.passed { "OK" } else { "FAIL" };
    match r.observed {
        Some(v) => writeln!(out, "  {} [{status}] (observed {v:.3})", r.threshold).ok(),
        None => writeln!(out, "  {} [{status}] (no data)", r.threshold).ok(),
    };
}

fn truncate_to_millis(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(d.as_millis() as u64)
}
