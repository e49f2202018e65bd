use std::time::{Duration, Instant};

/// Steps slower than this are flagged even when the probe succeeds.
pub const SLOW_STEP_THRESHOLD: Duration = Duration::from_millis(500);

/// Format a `Duration` as a human-readable string with automatic unit scaling.
///
/// Produces output like `1.94ms`, `2.34s`, `150.00µs` using Rust's Debug format.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Trace how long a probe step took, warning when it exceeds [`SLOW_STEP_THRESHOLD`].
pub fn log_step_duration(start: Instant, step: &'static str) {
    let elapsed = start.elapsed();
    if elapsed > SLOW_STEP_THRESHOLD {
        tracing::warn!(step, duration = fmt_duration(elapsed), "slow probe step");
    } else {
        tracing::trace!(step, duration = fmt_duration(elapsed), "probe step finished");
    }
}
