//! Parsing of "retry not before" hints attached to permission errors

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Naive layouts accepted in addition to RFC 3339 and RFC 2822; read as UTC
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Turn a server hint into the earliest time a new login may be attempted
///
/// The hint can be:
/// - A number of seconds from `now` (`"30"`); zero or negative means now
/// - An RFC 3339 timestamp (`"2026-01-01T10:00:00Z"`)
/// - An HTTP-date (`"Thu, 01 Jan 2026 10:00:00 GMT"`)
/// - A naive `YYYY-MM-DD HH:MM:SS` timestamp, taken as UTC
///
/// Returns `None` when the hint cannot be read. Results are never earlier
/// than `now`.
pub fn parse_blocked_until(hint: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = hint.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<i64>() {
        if seconds <= 0 {
            return Some(now);
        }
        return chrono::Duration::try_seconds(seconds).and_then(|d| now.checked_add_signed(d));
    }

    let parsed = DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|date| date.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        });

    match parsed {
        Some(date) => Some(date.max(now)),
        None => {
            warn!(hint = value, "Could not parse retry hint");
            None
        }
    }
}
