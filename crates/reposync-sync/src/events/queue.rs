//! Single-consumer event queue
//!
//! Any number of producers post events with [`ISyncEventQueue::add_event`];
//! one background task takes them out in arrival order and hands each to
//! the [`SyncEventManager`]. No two events are ever handled concurrently,
//! so handlers can treat [`ISyncEventQueue::is_empty`] as a stable snapshot
//! while they run.
//!
//! ## Flow
//!
//! ```text
//! scheduler ─┐
//! watcher   ─┼──→ mpsc::unbounded ──→ consumer task ──→ SyncEventManager::handle
//! handlers  ─┘          │
//!                  EventCounts ──→ count / category observers
//! ```

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use reposync_core::events::SyncEvent;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::manager::SyncEventManager;
use super::observer::{IObserver, ObserverList, Subscription};
use crate::lock;

// ============================================================================
// ISyncEventQueue
// ============================================================================

/// Producer side of the event queue
pub trait ISyncEventQueue: Send + Sync {
    /// Enqueue an event; never blocks, silently dropped once stopped
    fn add_event(&self, event: SyncEvent);

    /// Returns true if no event is waiting to be handled
    ///
    /// The event currently being handled is not counted.
    fn is_empty(&self) -> bool;
}

// ============================================================================
// Event counting
// ============================================================================

/// Pending-event counters and their observers
struct EventCounts {
    total: Mutex<usize>,
    per_category: Mutex<HashMap<&'static str, usize>>,
    count_observers: ObserverList<usize>,
    category_observers: ObserverList<(String, usize)>,
}

impl EventCounts {
    fn new() -> Self {
        Self {
            total: Mutex::new(0),
            per_category: Mutex::new(HashMap::new()),
            count_observers: ObserverList::new(),
            category_observers: ObserverList::new(),
        }
    }

    fn increment(&self, event: &SyncEvent) {
        self.adjust(event, true);
    }

    fn decrement(&self, event: &SyncEvent) {
        self.adjust(event, false);
    }

    fn adjust(&self, event: &SyncEvent, up: bool) {
        let total = {
            let mut total = lock(&self.total);
            *total = if up {
                *total + 1
            } else {
                total.saturating_sub(1)
            };
            *total
        };
        self.count_observers.notify(&total);

        if let Some(category) = event.category() {
            let count = {
                let mut per_category = lock(&self.per_category);
                let count = per_category.entry(category).or_insert(0);
                *count = if up { *count + 1 } else { count.saturating_sub(1) };
                *count
            };
            self.category_observers
                .notify(&(category.to_string(), count));
        }
    }

    fn total(&self) -> usize {
        *lock(&self.total)
    }

    fn complete(&self) {
        self.count_observers.complete();
        self.category_observers.complete();
    }
}

// ============================================================================
// SyncEventQueue
// ============================================================================

/// Tokio implementation of the event queue
///
/// Construct with [`SyncEventQueue::new`] from within a runtime; the
/// consumer task starts immediately.
pub struct SyncEventQueue {
    sender: mpsc::UnboundedSender<SyncEvent>,
    accepting: AtomicBool,
    counts: Arc<EventCounts>,
    cancel: CancellationToken,
    stopped: watch::Receiver<bool>,
}

impl SyncEventQueue {
    /// Create the queue and spawn its consumer task
    pub fn new(manager: Arc<SyncEventManager>) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stopped_tx, stopped) = watch::channel(false);
        let counts = Arc::new(EventCounts::new());
        let cancel = CancellationToken::new();

        tokio::spawn(consume(
            receiver,
            manager,
            counts.clone(),
            cancel.clone(),
            stopped_tx,
        ));

        Arc::new(Self {
            sender,
            accepting: AtomicBool::new(true),
            counts,
            cancel,
            stopped,
        })
    }

    /// Ask the consumer to exit after the event it is handling
    ///
    /// Events still waiting are discarded, and further `add_event` calls
    /// are ignored.
    pub fn stop_listener(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!("Stopping event queue listener");
        }
        self.cancel.cancel();
    }

    /// Wait until the consumer task has exited
    ///
    /// Returns false if it is still running when `timeout` elapses.
    pub async fn wait_for_stopped(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.clone();
        let done = matches!(
            tokio::time::timeout(timeout, stopped.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        done
    }

    /// Returns true once the consumer task has exited
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Stop the queue; equivalent to [`stop_listener`](Self::stop_listener)
    pub fn dispose(&self) {
        self.stop_listener();
    }

    /// Number of events waiting to be handled
    pub fn pending(&self) -> usize {
        self.counts.total()
    }

    /// Observe the number of waiting events
    pub fn subscribe_count(&self, observer: Arc<dyn IObserver<usize>>) -> Subscription {
        self.counts.count_observers.subscribe(observer)
    }

    /// Observe the number of waiting events per category
    ///
    /// Values are `(category, count)` pairs; see
    /// [`reposync_core::events::categories`].
    pub fn subscribe_category(
        &self,
        observer: Arc<dyn IObserver<(String, usize)>>,
    ) -> Subscription {
        self.counts.category_observers.subscribe(observer)
    }
}

impl ISyncEventQueue for SyncEventQueue {
    fn add_event(&self, event: SyncEvent) {
        if !self.accepting.load(Ordering::Acquire) {
            trace!(event = event.name(), "Queue stopped, dropping event");
            return;
        }

        self.counts.increment(&event);
        if let Err(mpsc::error::SendError(event)) = self.sender.send(event) {
            // consumer already gone
            self.counts.decrement(&event);
            trace!(event = event.name(), "Queue closed, dropping event");
        }
    }

    fn is_empty(&self) -> bool {
        self.counts.total() == 0
    }
}

impl Drop for SyncEventQueue {
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}

/// Consumer loop
async fn consume(
    mut receiver: mpsc::UnboundedReceiver<SyncEvent>,
    manager: Arc<SyncEventManager>,
    counts: Arc<EventCounts>,
    cancel: CancellationToken,
    stopped: watch::Sender<bool>,
) {
    debug!("Event queue listener started");

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        counts.decrement(&event);
        trace!(event = ?event, "Dispatching event");

        match AssertUnwindSafe(manager.handle(&event)).catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                error!(event = event.name(), error = %err, "Unhandled error while handling event");
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(event = event.name(), panic = %message, "Event handler panicked");
            }
        }
    }

    receiver.close();
    counts.complete();
    drop(manager);
    let _ = stopped.send(true);
    debug!("Event queue listener stopped");
}
