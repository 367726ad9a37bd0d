//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the adapter runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::Utc;

/// Wall-clock timestamp in milliseconds since the Unix epoch.
pub fn now_epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Signed scheduling lag in microseconds (positive when `actual` overshot).
pub fn jitter_us(actual: Duration, expected: Duration) -> i64 {
    let actual_us = actual.as_secs_f64() * 1_000_000.0;
    let expected_us = expected.as_secs_f64() * 1_000_000.0;
    (actual_us - expected_us).round() as i64
}
