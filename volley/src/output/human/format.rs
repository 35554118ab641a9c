use std::time::Duration;

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

pub(crate) fn format_rate(v: f64) -> String {
    if !v.is_finite() {
        return "0".to_string();
    }
    if v < 10.0 {
        format!("{v:.2}")
    } else {
        format!("{v:.0}")
    }
}

/// Latency in milliseconds, `-` when there is no data.
pub(crate) fn format_ms_opt(ms: Option<f64>) -> String {
    match ms {
        Some(v) if v.is_finite() && v >= 1000.0 => format!("{:.2}s", v / 1000.0),
        Some(v) if v.is_finite() && v >= 1.0 => format!("{v:.2}ms"),
        Some(v) if v.is_finite() => format!("{:.0}us", v * 1000.0),
        _ => "-".to_string(),
    }
}

pub(crate) fn format_percent(fraction: Option<f64>) -> String {
    match fraction {
        Some(v) if v.is_finite() => format!("{:.2}%", v * 100.0),
        _ => "-".to_string(),
    }
}

/// Single rounded component in one of: us, ms, s. Keeps progress lines short.
pub(crate) fn format_duration_single(d: Duration) -> String {
    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    // Ties round up.
    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    let total_ns = d.as_nanos();
    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}
