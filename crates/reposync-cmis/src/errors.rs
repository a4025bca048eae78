//! Mapping of HTTP failures onto [`CmisError`]
//!
//! The browser binding reports errors as a JSON body of the form
//! `{"exception": "objectNotFound", "message": "..."}` next to the HTTP
//! status. The status decides the category; the exception name refines
//! the 4xx cases a server may report with a generic status.

use reposync_core::domain::CmisError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    exception: Option<String>,
    message: Option<String>,
}

/// Build the error for a non-success response
pub(crate) fn error_from_response(status: StatusCode, headers: &HeaderMap, body: &str) -> CmisError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CmisError::PermissionDenied {
            message,
            retry_hint: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string()),
        },
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => CmisError::ProxyAuthRequired(message),
        StatusCode::NOT_FOUND => CmisError::ObjectNotFound(message),
        StatusCode::CONFLICT => CmisError::Constraint(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            CmisError::Connection(message)
        }
        s if s.is_server_error() => CmisError::Connection(message),
        _ => match parsed.exception.as_deref() {
            Some("objectNotFound") => CmisError::ObjectNotFound(message),
            Some(
                "constraint" | "nameConstraintViolation" | "contentAlreadyExists" | "updateConflict"
                | "versioning" | "storage",
            ) => CmisError::Constraint(message),
            Some("permissionDenied") => CmisError::PermissionDenied {
                message,
                retry_hint: None,
            },
            _ => CmisError::Runtime(message),
        },
    }
}

/// Build the error for a request that never produced a response
pub(crate) fn error_from_transport(err: reqwest::Error) -> CmisError {
    if err.is_decode() {
        CmisError::Runtime(format!("Malformed response: {err}"))
    } else {
        CmisError::Connection(err.to_string())
    }
}
