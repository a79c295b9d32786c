//! Time utilities.
//!
//! Exchange timestamps arrive as **milliseconds since Unix epoch**; the domain
//! types carry `chrono::DateTime<Utc>`. This module converts between the two and
//! renders human-readable holding durations.

use chrono::{DateTime, TimeZone, Utc};

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert exchange milliseconds into a UTC timestamp.
///
/// Out-of-range values collapse to the Unix epoch rather than panicking.
#[inline]
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::UNIX_EPOCH)
}

/// Render a holding period the way trade reports show it.
///
/// | Span          | Label      |
/// |---------------|------------|
/// | ≥ 1 day       | `2d 3h`    |
/// | ≥ 1 hour      | `3h 15m`   |
/// | ≥ 1 minute    | `42m`      |
/// | otherwise     | `17s`      |
///
/// Negative spans (clock skew between legs) render as `0s`.
pub fn duration_label(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let secs = (to - from).num_seconds().max(0);
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{secs}s")
    }
}
