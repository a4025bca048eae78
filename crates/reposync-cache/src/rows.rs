//! Conversions between stored column values and domain types
//!
//! | Domain Type         | SQL Type | Strategy                                 |
//! |---------------------|----------|------------------------------------------|
//! | UniqueId            | TEXT     | UUID string via `to_string()` / `FromStr` |
//! | RemoteId            | TEXT     | `as_str()` / `RemoteId::new()`            |
//! | ChangeToken         | TEXT     | `as_str()` / `ChangeToken::new()`         |
//! | ContentHash         | 2x TEXT  | algorithm and digest columns             |
//! | DateTime<Utc>       | TEXT     | RFC 3339 via `to_rfc3339()`              |
//! | PathBuf             | TEXT     | `/`-separated relative path              |
//! | u64                 | INTEGER  | cast through `i64`                        |

use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use reposync_core::domain::{ChangeToken, RemoteId, UniqueId};

use crate::CacheError;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's own CURRENT_TIMESTAMP format
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

pub(crate) fn parse_optional_datetime(
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn parse_unique_id(s: &str) -> Result<UniqueId, CacheError> {
    UniqueId::from_str(s)
        .map_err(|e| CacheError::SerializationError(format!("Invalid id '{}': {}", s, e)))
}

pub(crate) fn parse_remote_id(s: String) -> Result<RemoteId, CacheError> {
    RemoteId::new(s).map_err(|e| CacheError::SerializationError(e.to_string()))
}

pub(crate) fn parse_optional_remote_id(s: Option<String>) -> Result<Option<RemoteId>, CacheError> {
    s.map(parse_remote_id).transpose()
}

pub(crate) fn parse_optional_token(s: Option<String>) -> Result<Option<ChangeToken>, CacheError> {
    s.map(|token| {
        ChangeToken::new(token).map_err(|e| CacheError::SerializationError(e.to_string()))
    })
    .transpose()
}

/// Stored sizes are never negative; treat a corrupt value as unknown
pub(crate) fn to_u64(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

pub(crate) fn to_i64(value: Option<u64>) -> Option<i64> {
    value.and_then(|v| i64::try_from(v).ok())
}

/// Relative path as stored: normal components joined with `/`
pub(crate) fn path_to_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn path_from_string(s: &str) -> PathBuf {
    s.split('/').filter(|segment| !segment.is_empty()).collect()
}
