use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Live progress line on stderr. Created lazily on the first update so that runs which fail
/// validation never draw anything.
pub(crate) struct HumanProgress {
    inner: Mutex<Option<RunProgressBar>>,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub(crate) fn update(
        &self,
        prefix: &str,
        total_duration: Duration,
        elapsed: Duration,
        message: String,
    ) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let desired_kind = if total_duration.is_zero() {
            ProgressBarKind::Spinner
        } else {
            ProgressBarKind::Bar
        };

        if inner.as_ref().is_some_and(|b| b.kind != desired_kind)
            && let Some(old) = inner.take()
        {
            old.pb.finish_and_clear();
        }

        let bar = inner.get_or_insert_with(|| RunProgressBar::new(prefix, desired_kind));
        bar.pb.set_prefix(prefix.to_string());
        bar.pb.set_message(message);

        match bar.kind {
            ProgressBarKind::Bar => {
                let total_ms = total_duration.as_millis() as u64;
                let elapsed_ms = elapsed.as_millis() as u64;
                bar.pb.set_length(total_ms);
                bar.pb.set_position(elapsed_ms.min(total_ms));
            }
            ProgressBarKind::Spinner => bar.pb.tick(),
        }
    }

    pub(crate) fn finish(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(bar) = inner.take() {
            bar.pb.finish_and_clear();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressBarKind {
    Spinner,
    Bar,
}

struct RunProgressBar {
    kind: ProgressBarKind,
    pb: ProgressBar,
}

impl RunProgressBar {
    fn new(prefix: &str, kind: ProgressBarKind) -> Self {
        let pb = match kind {
            ProgressBarKind::Bar => {
                let pb = ProgressBar::with_draw_target(Some(0), draw_target());
                pb.set_style(bar_style());
                pb
            }
            ProgressBarKind::Spinner => {
                let pb = ProgressBar::with_draw_target(None, draw_target());
                pb.set_style(spinner_style());
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            }
        };
        pb.set_prefix(prefix.to_string());

        Self { kind, pb }
    }
}

fn draw_target() -> ProgressDrawTarget {
    ProgressDrawTarget::stderr_with_hz(5)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
