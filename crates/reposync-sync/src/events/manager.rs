//! Prioritized handler chain
//!
//! The [`SyncEventManager`] walks its handlers from highest to lowest
//! priority until one of them consumes the event. Handlers registered with
//! equal priority run in registration order.
//!
//! ## Failure handling
//!
//! A handler error is reported to the `on_exception` observers. Errors of
//! the connection category are then returned to the caller (the queue's
//! consumer loop); everything else is swallowed and the next handler runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reposync_core::events::SyncEvent;
use tracing::{debug, trace, warn};

use super::observer::{IObserver, ObserverList, Subscription};
use crate::SyncError;

// ============================================================================
// ISyncEventHandler
// ============================================================================

/// A link in the handler chain
#[async_trait]
pub trait ISyncEventHandler: Send + Sync {
    /// Position in the chain (higher runs first)
    fn priority(&self) -> i32;

    /// Name used in logs
    fn name(&self) -> &str;

    /// Process an event
    ///
    /// Returns `Ok(true)` if the event was consumed and must not reach
    /// lower-priority handlers.
    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError>;
}

/// Identity of a handler: the address of its shared allocation
fn handler_key(handler: &Arc<dyn ISyncEventHandler>) -> *const () {
    Arc::as_ptr(handler) as *const ()
}

struct Registration {
    handler: Arc<dyn ISyncEventHandler>,
    priority: i32,
    sequence: u64,
}

// ============================================================================
// SyncEventManager
// ============================================================================

/// Ordered set of event handlers
pub struct SyncEventManager {
    handlers: RwLock<Vec<Registration>>,
    next_sequence: AtomicU64,
    exceptions: ObserverList<SyncError>,
}

impl SyncEventManager {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(0),
            exceptions: ObserverList::new(),
        }
    }

    /// Register a handler
    ///
    /// Returns false (and changes nothing) if the same handler instance is
    /// already registered.
    pub fn add_event_handler(&self, handler: Arc<dyn ISyncEventHandler>) -> bool {
        let key = handler_key(&handler);
        let priority = handler.priority();
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if handlers.iter().any(|r| handler_key(&r.handler) == key) {
            warn!(handler = handler.name(), "Handler already registered, ignoring");
            return false;
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        // after every handler with a priority >= ours
        let position = handlers
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(handlers.len());

        debug!(handler = handler.name(), priority, "Registering event handler");
        handlers.insert(
            position,
            Registration {
                handler,
                priority,
                sequence,
            },
        );
        true
    }

    /// Unregister a handler
    ///
    /// Returns false if the handler was not registered.
    pub fn remove_event_handler(&self, handler: &Arc<dyn ISyncEventHandler>) -> bool {
        let key = handler_key(handler);
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|r| handler_key(&r.handler) != key);
        let removed = handlers.len() != before;
        if removed {
            debug!(handler = handler.name(), "Removed event handler");
        }
        removed
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.read_handlers().len()
    }

    /// Names of the registered handlers in dispatch order
    pub fn handler_names(&self) -> Vec<String> {
        self.read_handlers()
            .iter()
            .map(|r| r.handler.name().to_string())
            .collect()
    }

    /// Observe every error raised by a handler
    pub fn on_exception(&self, observer: Arc<dyn IObserver<SyncError>>) -> Subscription {
        self.exceptions.subscribe(observer)
    }

    /// Pass an event down the chain
    ///
    /// Handlers removed while the event is being dispatched are skipped;
    /// handlers added meanwhile only see later events.
    ///
    /// # Errors
    ///
    /// Returns the first connection-category error raised by a handler.
    pub async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let snapshot: Vec<Arc<dyn ISyncEventHandler>> = self
            .read_handlers()
            .iter()
            .map(|r| r.handler.clone())
            .collect();

        for handler in snapshot {
            if !self.is_registered(&handler) {
                continue;
            }

            match handler.handle(event).await {
                Ok(true) => {
                    trace!(event = event.name(), handler = handler.name(), "Event consumed");
                    return Ok(true);
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        event = event.name(),
                        handler = handler.name(),
                        error = %error,
                        "Event handler failed"
                    );
                    self.exceptions.notify(&error);
                    if error.is_connection() {
                        return Err(error);
                    }
                }
            }
        }

        Ok(false)
    }

    fn is_registered(&self, handler: &Arc<dyn ISyncEventHandler>) -> bool {
        let key = handler_key(handler);
        self.read_handlers()
            .iter()
            .any(|r| handler_key(&r.handler) == key)
    }

    fn read_handlers(&self) -> std::sync::RwLockReadGuard<'_, Vec<Registration>> {
        self.handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for SyncEventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SyncEventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.read_handlers();
        f.debug_struct("SyncEventManager")
            .field(
                "handlers",
                &handlers
                    .iter()
                    .map(|r| (r.handler.name().to_string(), r.priority, r.sequence))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
