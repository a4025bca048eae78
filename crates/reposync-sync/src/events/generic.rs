//! Closure-backed and logging handlers

use async_trait::async_trait;
use reposync_core::events::SyncEvent;
use tracing::debug;

use super::manager::ISyncEventHandler;
use super::priorities;
use crate::SyncError;

type HandleFn = dyn Fn(&SyncEvent) -> bool + Send + Sync;

/// Handler whose behaviour is a closure
///
/// Useful for outward-facing consumers (notifications, status displays)
/// that only need to peek at events.
pub struct GenericSyncEventHandler {
    name: String,
    priority: i32,
    handler: Box<HandleFn>,
}

impl GenericSyncEventHandler {
    /// The closure returns true to consume the event
    pub fn new<F>(name: impl Into<String>, priority: i32, handler: F) -> Self
    where
        F: Fn(&SyncEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            handler: Box::new(handler),
        }
    }

    /// Handler with [`priorities::GENERIC`]
    pub fn with_default_priority<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&SyncEvent) -> bool + Send + Sync + 'static,
    {
        Self::new(name, priorities::GENERIC, handler)
    }
}

#[async_trait]
impl ISyncEventHandler for GenericSyncEventHandler {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        Ok((self.handler)(event))
    }
}

/// Logs every event at debug level; never consumes
pub struct DebugLoggingHandler {
    repository: String,
}

impl DebugLoggingHandler {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
        }
    }
}

#[async_trait]
impl ISyncEventHandler for DebugLoggingHandler {
    fn priority(&self) -> i32 {
        priorities::DEBUG
    }

    fn name(&self) -> &str {
        "DebugLoggingHandler"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        debug!(repository = %self.repository, event = ?event, "Event");
        Ok(false)
    }
}
