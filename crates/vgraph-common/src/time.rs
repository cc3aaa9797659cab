//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Shared primitives and utilities for the telemetry runtime."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::time::Duration;

/// Signed deviation of `actual` from `expected`, in microseconds.
pub fn jitter_us(actual: Duration, expected: Duration) -> i64 {
    let actual_us = actual.as_secs_f64() * 1_000_000.0;
    let expected_us = expected.as_secs_f64() * 1_000_000.0;
    (actual_us - expected_us).round() as i64
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
