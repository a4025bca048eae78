//! Sync request coalescing and retry buffering
//!
//! Keeps at most one sync pass pending while the queue drains, and holds
//! back retried change events so they never race a new pass.
//!
//! - `StartNextSync` on an empty queue runs immediately.
//! - `StartNextSync` on a busy queue is deferred; its full-sync flag is
//!   OR-ed into the pending request so a full request is never downgraded.
//! - Change events with a positive retry counter are buffered.
//! - Once the queue is empty with a pass pending, buffered retries are
//!   re-enqueued (or dropped if the pending pass is a full one, which
//!   rediscovers everything) followed by the pending `StartNextSync`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reposync_core::domain::UniqueId;
use reposync_core::events::SyncEvent;
use tracing::debug;

use crate::events::{priorities, ISyncEventHandler, ISyncEventQueue};
use crate::{lock, SyncError};

#[derive(Default)]
struct State {
    sync_pending: bool,
    full_sync_requested: bool,
    buffered: Vec<SyncEvent>,
    /// Ids of retries put back on the queue; they pass through once
    replayed: HashSet<UniqueId>,
}

impl State {
    /// Empty the buffer, returning what should be re-enqueued
    ///
    /// Called only on a drained queue, so earlier replays have all been
    /// dispatched and their ids can be forgotten.
    fn release(&mut self, full: bool) -> Vec<SyncEvent> {
        self.replayed.clear();
        let buffered = std::mem::take(&mut self.buffered);
        if full {
            if !buffered.is_empty() {
                debug!(discarded = buffered.len(), "Dropping buffered retries before full sync");
            }
            return Vec::new();
        }
        for event in &buffered {
            if let Some(change) = event.as_change() {
                self.replayed.insert(change.id());
            }
        }
        buffered
    }
}

pub struct DelayRetryAndNextSyncEventHandler {
    queue: Arc<dyn ISyncEventQueue>,
    state: Mutex<State>,
}

impl DelayRetryAndNextSyncEventHandler {
    pub fn new(queue: Arc<dyn ISyncEventQueue>) -> Self {
        Self {
            queue,
            state: Mutex::new(State::default()),
        }
    }

    /// Returns true while a deferred sync request waits for the queue to drain
    pub fn sync_pending(&self) -> bool {
        lock(&self.state).sync_pending
    }

    /// Number of retries held back
    pub fn buffered(&self) -> usize {
        lock(&self.state).buffered.len()
    }

    #[cfg(test)]
    fn replayed(&self) -> usize {
        lock(&self.state).replayed.len()
    }

    fn enqueue_all(&self, events: Vec<SyncEvent>) {
        for event in events {
            self.queue.add_event(event);
        }
    }
}

#[async_trait]
impl ISyncEventHandler for DelayRetryAndNextSyncEventHandler {
    fn priority(&self) -> i32 {
        priorities::DELAY_RETRY
    }

    fn name(&self) -> &str {
        "DelayRetryAndNextSyncEventHandler"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let queue_empty = self.queue.is_empty();

        let (consumed, (replay, next_sync)) = {
            let mut state = lock(&self.state);
            match event {
                SyncEvent::StartNextSync {
                    full_sync_requested,
                } if !queue_empty => {
                    state.sync_pending = true;
                    state.full_sync_requested |= *full_sync_requested;
                    debug!(
                        full = state.full_sync_requested,
                        "Queue busy, deferring sync request"
                    );
                    return Ok(true);
                }
                SyncEvent::StartNextSync {
                    full_sync_requested,
                } => {
                    let pending_full = state.sync_pending && state.full_sync_requested;
                    state.sync_pending = false;
                    state.full_sync_requested = false;
                    if pending_full && !*full_sync_requested {
                        // the pending full pass replaces this partial one
                        let _ = state.release(true);
                        (true, (Vec::new(), Some(SyncEvent::start_next_sync(true))))
                    } else {
                        (false, (state.release(*full_sync_requested), None))
                    }
                }
                SyncEvent::Change(change) if change.retry_count() > 0 => {
                    let held = !state.replayed.remove(&change.id());
                    if held {
                        debug!(event = %change, retry = change.retry_count(), "Holding retry back");
                        state.buffered.push(event.clone());
                    }
                    (held, Self::drain_if_idle(&mut state, queue_empty))
                }
                _ => (false, Self::drain_if_idle(&mut state, queue_empty)),
            }
        };

        self.enqueue_all(replay);
        if let Some(next_sync) = next_sync {
            self.queue.add_event(next_sync);
        }
        Ok(consumed)
    }
}

impl DelayRetryAndNextSyncEventHandler {
    /// Release a pending pass if the queue has drained
    fn drain_if_idle(
        state: &mut State,
        queue_empty: bool,
    ) -> (Vec<SyncEvent>, Option<SyncEvent>) {
        if !(state.sync_pending && queue_empty) {
            return (Vec::new(), None);
        }
        let full = state.full_sync_requested;
        state.sync_pending = false;
        state.full_sync_requested = false;
        let replay = state.release(full);
        debug!(replayed = replay.len(), full, "Queue drained, releasing pending sync");
        (replay, Some(SyncEvent::start_next_sync(full)))
    }
}

#[cfg(test)]
mod tests {
    use reposync_core::events::{ChangeEvent, ChangeType, ObjectType};

    use super::*;
    use crate::testing::RecordingQueue;

    fn handler() -> (Arc<RecordingQueue>, DelayRetryAndNextSyncEventHandler) {
        let queue = RecordingQueue::new();
        let handler = DelayRetryAndNextSyncEventHandler::new(queue.clone());
        (queue, handler)
    }

    fn retry(path: &str) -> SyncEvent {
        ChangeEvent::local(ChangeType::Changed, ObjectType::File, path)
            .retried()
            .into()
    }

    fn fresh(path: &str) -> SyncEvent {
        ChangeEvent::local(ChangeType::Changed, ObjectType::File, path).into()
    }

    fn is_sync(event: &SyncEvent, full: bool) -> bool {
        matches!(event, SyncEvent::StartNextSync { full_sync_requested } if *full_sync_requested == full)
    }

    #[tokio::test]
    async fn test_sync_on_empty_queue_passes() {
        let (queue, handler) = handler();
        assert!(!handler.handle(&SyncEvent::start_next_sync(false)).await.unwrap());
        assert!(!handler.handle(&SyncEvent::start_next_sync(true)).await.unwrap());
        assert!(queue.events().is_empty());
        assert!(!handler.sync_pending());
    }

    #[tokio::test]
    async fn test_sync_on_busy_queue_is_deferred() {
        let (queue, handler) = handler();
        queue.set_empty(false);

        assert!(handler.handle(&SyncEvent::start_next_sync(false)).await.unwrap());
        assert!(handler.sync_pending());
        assert!(queue.events().is_empty());
    }

    #[tokio::test]
    async fn test_buffered_retries_replay_before_partial_sync() {
        let (queue, handler) = handler();
        queue.set_empty(false);

        assert!(handler.handle(&retry("a.txt")).await.unwrap());
        assert!(handler.handle(&retry("b.txt")).await.unwrap());
        assert!(handler.handle(&SyncEvent::start_next_sync(false)).await.unwrap());
        assert_eq!(handler.buffered(), 2);

        queue.set_empty(true);
        assert!(!handler.handle(&fresh("c.txt")).await.unwrap());

        let events = queue.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_change().unwrap().local_path().unwrap().to_str(), Some("a.txt"));
        assert_eq!(events[1].as_change().unwrap().local_path().unwrap().to_str(), Some("b.txt"));
        assert!(is_sync(&events[2], false));
        assert!(!handler.sync_pending());

        // replayed retries pass through instead of being held again
        for replayed in &events[..2] {
            assert!(!handler.handle(replayed).await.unwrap());
        }
        assert_eq!(handler.buffered(), 0);
    }

    #[tokio::test]
    async fn test_full_sync_discards_buffered_retries() {
        let (queue, handler) = handler();
        queue.set_empty(false);

        handler.handle(&retry("a.txt")).await.unwrap();
        handler.handle(&retry("b.txt")).await.unwrap();
        handler.handle(&SyncEvent::start_next_sync(true)).await.unwrap();

        queue.set_empty(true);
        handler.handle(&fresh("c.txt")).await.unwrap();

        let events = queue.events();
        assert_eq!(events.len(), 1);
        assert!(is_sync(&events[0], true));
        assert_eq!(handler.buffered(), 0);
    }

    #[tokio::test]
    async fn test_full_flag_is_sticky() {
        let (queue, handler) = handler();
        queue.set_empty(false);

        handler.handle(&SyncEvent::start_next_sync(true)).await.unwrap();
        handler.handle(&SyncEvent::start_next_sync(false)).await.unwrap();

        queue.set_empty(true);
        handler.handle(&fresh("x")).await.unwrap();

        let events = queue.events();
        assert_eq!(events.len(), 1);
        assert!(is_sync(&events[0], true));
    }

    #[tokio::test]
    async fn test_partial_request_on_drained_queue_upgrades_to_pending_full() {
        let (queue, handler) = handler();
        queue.set_empty(false);
        handler.handle(&SyncEvent::start_next_sync(true)).await.unwrap();

        queue.set_empty(true);
        assert!(handler.handle(&SyncEvent::start_next_sync(false)).await.unwrap());

        let events = queue.events();
        assert_eq!(events.len(), 1);
        assert!(is_sync(&events[0], true));
        assert!(!handler.sync_pending());
    }

    #[tokio::test]
    async fn test_retry_on_drained_queue_with_pending_sync() {
        let (queue, handler) = handler();
        queue.set_empty(false);
        handler.handle(&SyncEvent::start_next_sync(false)).await.unwrap();

        queue.set_empty(true);
        let event = retry("late.txt");
        // the retry is held and replayed ahead of the pending sync
        assert!(handler.handle(&event).await.unwrap());

        let events = queue.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_change().unwrap().id(), event.as_change().unwrap().id());
        assert!(is_sync(&events[1], false));
    }

    #[tokio::test]
    async fn test_immediate_sync_releases_buffer() {
        let (queue, handler) = handler();
        queue.set_empty(false);
        handler.handle(&retry("a.txt")).await.unwrap();

        queue.set_empty(true);
        assert!(!handler.handle(&SyncEvent::start_next_sync(false)).await.unwrap());
        assert_eq!(queue.events().len(), 1);
        assert_eq!(handler.buffered(), 0);
    }

    #[tokio::test]
    async fn test_replayed_ids_do_not_accumulate() {
        let (queue, handler) = handler();

        for round in 0..3 {
            queue.set_empty(false);
            handler.handle(&retry(&format!("r{round}.txt"))).await.unwrap();
            handler.handle(&SyncEvent::start_next_sync(false)).await.unwrap();
            queue.set_empty(true);
            handler.handle(&fresh("x")).await.unwrap();
            // the replayed retry is consumed upstream and never comes back
            assert_eq!(handler.replayed(), 1);
        }
        assert_eq!(queue.events().len(), 6);
    }

    #[tokio::test]
    async fn test_events_without_retry_pass() {
        let (queue, handler) = handler();
        queue.set_empty(false);
        assert!(!handler.handle(&fresh("a.txt")).await.unwrap());
        assert!(!handler
            .handle(&SyncEvent::Exception {
                message: "x".into()
            })
            .await
            .unwrap());
        assert!(queue.events().is_empty());
    }

    mod through_queue {
        use std::time::Duration;

        use reposync_core::events::{ChangeEvent, ChangeType, ObjectType};

        use super::super::*;
        use crate::events::{SyncEventManager, SyncEventQueue};

        /// Records a label per event; sleeps on `Exception { "slow" }`
        struct Trace {
            seen: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl ISyncEventHandler for Trace {
            fn priority(&self) -> i32 {
                priorities::GENERIC
            }

            fn name(&self) -> &str {
                "trace"
            }

            async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
                let label = match event {
                    SyncEvent::Exception { message } => {
                        if message == "slow" {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                        message.clone()
                    }
                    SyncEvent::Change(change) => format!(
                        "{}:{}",
                        change.local_path().unwrap().display(),
                        change.retry_count()
                    ),
                    SyncEvent::StartNextSync {
                        full_sync_requested,
                    } => format!("sync:{full_sync_requested}"),
                    other => other.name().to_string(),
                };
                self.seen.lock().unwrap().push(label);
                Ok(true)
            }
        }

        fn change(path: &str) -> ChangeEvent {
            ChangeEvent::local(ChangeType::Changed, ObjectType::File, path)
        }

        async fn run(full: bool) -> Vec<String> {
            let manager = Arc::new(SyncEventManager::new());
            let queue = SyncEventQueue::new(manager.clone());
            let trace = Arc::new(Trace {
                seen: Mutex::new(Vec::new()),
            });
            manager.add_event_handler(Arc::new(DelayRetryAndNextSyncEventHandler::new(
                queue.clone(),
            )));
            manager.add_event_handler(trace.clone());

            queue.add_event(SyncEvent::Exception {
                message: "slow".into(),
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
            queue.add_event(change("a").retried().into());
            queue.add_event(change("b").retried().into());
            queue.add_event(SyncEvent::start_next_sync(full));
            queue.add_event(change("c").into());

            let expected = if full { 3 } else { 5 };
            for _ in 0..200 {
                if trace.seen.lock().unwrap().len() >= expected && queue.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            queue.stop_listener();
            let seen = trace.seen.lock().unwrap().clone();
            seen
        }

        #[tokio::test]
        async fn test_busy_queue_replays_retries_before_partial_sync() {
            assert_eq!(run(false).await, vec!["slow", "c:0", "a:1", "b:1", "sync:false"]);
        }

        #[tokio::test]
        async fn test_busy_queue_full_sync_discards_retries() {
            assert_eq!(run(true).await, vec!["slow", "c:0", "sync:true"]);
        }
    }
}
