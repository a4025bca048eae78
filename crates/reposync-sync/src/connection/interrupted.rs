//! Turns connection failures raised by handlers into `ConnectionException` events

use std::sync::Arc;

use reposync_core::events::SyncEvent;
use tracing::debug;

use crate::events::{observer_fn, ISyncEventQueue, Subscription, SyncEventManager};
use crate::SyncError;

/// Reposts connection-category handler errors onto the queue
///
/// The subscription lives as long as this value; drop it to stop.
pub struct ConnectionInterruptedHandler {
    _subscription: Subscription,
}

impl ConnectionInterruptedHandler {
    pub fn new(manager: &SyncEventManager, queue: Arc<dyn ISyncEventQueue>) -> Self {
        let subscription = manager.on_exception(observer_fn(move |error: &SyncError| {
            if let Some(cause) = error.connection_cause() {
                debug!(error = %cause, "Reporting interrupted connection");
                queue.add_event(SyncEvent::ConnectionException {
                    cause: cause.clone(),
                });
            }
        }));
        Self {
            _subscription: subscription,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use reposync_core::domain::CmisError;

    use super::*;
    use crate::events::ISyncEventHandler;
    use crate::testing::RecordingQueue;

    struct Failing(CmisError);

    #[async_trait]
    impl ISyncEventHandler for Failing {
        fn priority(&self) -> i32 {
            0
        }

        fn name(&self) -> &str {
            "Failing"
        }

        async fn handle(&self, _event: &SyncEvent) -> Result<bool, SyncError> {
            Err(SyncError::Remote(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn test_connection_errors_are_reposted() {
        let manager = SyncEventManager::new();
        let queue = RecordingQueue::new();
        let _handler = ConnectionInterruptedHandler::new(&manager, queue.clone());
        manager.add_event_handler(Arc::new(Failing(CmisError::Connection("reset".into()))));

        assert!(manager.handle(&SyncEvent::start_next_sync(false)).await.is_err());

        let events = queue.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SyncEvent::ConnectionException { cause } => {
                assert_eq!(cause, &CmisError::Connection("reset".into()))
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_other_errors_are_not_reposted() {
        let manager = SyncEventManager::new();
        let queue = RecordingQueue::new();
        let _handler = ConnectionInterruptedHandler::new(&manager, queue.clone());
        manager.add_event_handler(Arc::new(Failing(CmisError::Constraint("locked".into()))));

        assert!(manager.handle(&SyncEvent::start_next_sync(false)).await.is_ok());
        assert!(queue.events().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_stops_reposting() {
        let manager = SyncEventManager::new();
        let queue = RecordingQueue::new();
        let handler = ConnectionInterruptedHandler::new(&manager, queue.clone());
        manager.add_event_handler(Arc::new(Failing(CmisError::Connection("reset".into()))));
        drop(handler);

        let _ = manager.handle(&SyncEvent::start_next_sync(false)).await;
        assert!(queue.events().is_empty());
    }
}
