//! RepoSync Sync - Event-driven synchronization control plane
//!
//! Provides:
//! - A single-consumer event queue and a prioritized handler chain
//! - Connection supervision with permission-denied backoff
//! - Capability-dependent installation of change-detection handlers
//! - Coalescing of sync requests and delayed retries
//!
//! ## Modules
//!
//! - [`events`] - Queue, manager, observers and generic handlers
//! - [`connection`] - Connection scheduler and connection-failure bridging
//! - [`initializer`] - Per-session handler installation
//! - [`delay_retry`] - Sync request coalescing and retry buffering
//! - [`crawler`], [`content_changes`], [`fetcher`], [`move_accumulator`],
//!   [`selective_ignore`], [`mechanism`] - Per-session handlers
//! - [`filesystem`] - Local filesystem helpers (atomic writes, checksums)
//! - [`watcher`] - Local change producer
//! - [`reporting`] - Status snapshot for front ends
//! - [`repository`] - Per-repository composition root

pub mod connection;
pub mod content_changes;
pub mod context;
pub mod crawler;
pub mod delay_retry;
pub mod events;
pub mod fetcher;
pub mod filesystem;
pub mod initializer;
pub mod mechanism;
pub mod move_accumulator;
pub mod reporting;
pub mod repository;
pub mod selective_ignore;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

use reposync_core::domain::{CmisError, DomainError};
use thiserror::Error;

/// Errors raised by sync event handlers
#[derive(Debug, Error)]
pub enum SyncError {
    /// The repository reported an error
    #[error("Remote error: {0}")]
    Remote(#[from] CmisError),

    /// A storage adapter failed
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The work was cancelled because its session was superseded
    #[error("Operation cancelled")]
    Cancelled,

    /// A domain-level error propagated from reposync-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// The handler cannot proceed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl SyncError {
    /// Returns true for errors that mean the session is unusable
    pub fn is_connection(&self) -> bool {
        self.connection_cause().is_some()
    }

    /// The remote error behind a connection-category failure
    pub fn connection_cause(&self) -> Option<&CmisError> {
        match self {
            SyncError::Remote(cause) if cause.is_connection() => Some(cause),
            _ => None,
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
