//! Watermark and status timestamps.
//!
//! Every timestamp the hub writes (watermarks, `last_checked`,
//! `state_updated_at`, …) is UTC RFC 3339 with exactly six fractional digits
//! and a `Z` suffix. Fixed width makes lexical and temporal order coincide,
//! which the sync client relies on when comparing watermarks as strings.

use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC datetime as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub fn format_datetime(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Format a filesystem timestamp (file mtime) as a watermark string.
pub fn format_system_time(timestamp: SystemTime) -> String {
    format_datetime(DateTime::<Utc>::from(timestamp))
}

/// Current wall-clock time as a watermark string.
pub fn now() -> String {
    format_datetime(Utc::now())
}

/// Parse a timestamp previously produced by this module (or any RFC 3339 value).
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Compact age of a timestamp relative to now (`42s`, `5m`, `3h`, `2d`).
pub fn format_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
