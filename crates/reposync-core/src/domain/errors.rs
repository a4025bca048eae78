//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! validation failures of identifiers and paths, and the tagged error
//! taxonomy reported by the remote repository.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Path is not within the configured local root
    #[error("Path not within sync root: {0}")]
    PathNotInSyncRoot(String),

    /// Invalid remote object ID
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid change token
    #[error("Invalid change token: {0}")]
    InvalidChangeToken(String),

    /// Invalid content hash
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

/// Errors reported by the remote repository or while talking to it
///
/// The variants are the categories the connection scheduler and the
/// event manager branch on, so adapters must map their transport
/// failures onto them instead of returning opaque errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CmisError {
    /// Credentials were rejected
    ///
    /// `retry_hint` carries the raw "retry not before" value the server
    /// attached to the response, if any.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Server supplied explanation
        message: String,
        /// Raw hint (seconds or timestamp) telling when to retry
        retry_hint: Option<String>,
    },

    /// A proxy between us and the repository requires authentication
    #[error("Proxy authentication required: {0}")]
    ProxyAuthRequired(String),

    /// Transient network or protocol failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The requested object does not exist (anymore)
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The repository refused the operation (name clash, locked object, ...)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Anything else
    #[error("Repository error: {0}")]
    Runtime(String),
}

impl CmisError {
    /// Returns true for the errors that invalidate the current session
    ///
    /// These are re-raised by the event manager and turned into
    /// `ConnectionException` events so the connection scheduler can
    /// reconnect.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            CmisError::Connection(_)
                | CmisError::PermissionDenied { .. }
                | CmisError::ProxyAuthRequired(_)
        )
    }

    /// Short, stable name of the category (used in logs and events)
    pub fn category(&self) -> &'static str {
        match self {
            CmisError::PermissionDenied { .. } => "permission_denied",
            CmisError::ProxyAuthRequired(_) => "proxy_auth_required",
            CmisError::Connection(_) => "connection",
            CmisError::ObjectNotFound(_) => "not_found",
            CmisError::Constraint(_) => "constraint",
            CmisError::Runtime(_) => "runtime",
        }
    }
}
