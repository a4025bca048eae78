//! Repository status reporting
//!
//! [`StatusReporter`] sits near the top of the handler chain and folds the
//! events it sees into a [`RepositoryStatus`] snapshot. It never consumes
//! an event. Consumers (the daemon, a tray icon) follow the snapshot with
//! a `tokio::sync::watch` receiver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposync_core::events::{SyncEvent, TransmissionStatus};
use tokio::sync::watch;
use tracing::debug;

use crate::events::{priorities, ISyncEventHandler};
use crate::SyncError;

/// Connection state as last reported on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    /// Credentials rejected; `None` means until the configuration changes
    Blocked { until: Option<DateTime<Utc>> },
    ProxyAuthRequired,
}

/// Point-in-time view of one repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryStatus {
    pub connection: ConnectionState,
    pub last_error: Option<String>,
    pub last_sync_requested: Option<DateTime<Utc>>,
    pub active_transfers: usize,
    pub completed_transfers: u64,
    pub failed_transfers: u64,
    pub changes_seen: u64,
}

pub struct StatusReporter {
    repository: String,
    status: watch::Sender<RepositoryStatus>,
}

impl StatusReporter {
    pub fn new(repository: impl Into<String>) -> Self {
        let (status, _) = watch::channel(RepositoryStatus::default());
        Self {
            repository: repository.into(),
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RepositoryStatus> {
        self.status.subscribe()
    }

    pub fn current(&self) -> RepositoryStatus {
        self.status.borrow().clone()
    }
}

#[async_trait]
impl ISyncEventHandler for StatusReporter {
    fn priority(&self) -> i32 {
        priorities::REPORTING
    }

    fn name(&self) -> &str {
        "StatusReporter"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        self.status.send_modify(|status| match event {
            SyncEvent::SuccessfulLogin { .. } => {
                status.connection = ConnectionState::Connected;
                status.last_error = None;
            }
            SyncEvent::PermissionDenied {
                blocked_until,
                message,
            } => {
                status.connection = ConnectionState::Blocked {
                    until: *blocked_until,
                };
                status.last_error = Some(message.clone());
            }
            SyncEvent::ProxyAuthRequired { message } => {
                status.connection = ConnectionState::ProxyAuthRequired;
                status.last_error = Some(message.clone());
            }
            SyncEvent::ConnectionException { cause } => {
                status.connection = ConnectionState::Disconnected;
                status.last_error = Some(cause.to_string());
            }
            SyncEvent::Exception { message } => status.last_error = Some(message.clone()),
            SyncEvent::StartNextSync { .. } => status.last_sync_requested = Some(Utc::now()),
            SyncEvent::Change(_) => status.changes_seen += 1,
            SyncEvent::Transmission(transmission) => match &transmission.status {
                TransmissionStatus::Started => status.active_transfers += 1,
                TransmissionStatus::Finished => {
                    status.active_transfers = status.active_transfers.saturating_sub(1);
                    status.completed_transfers += 1;
                }
                TransmissionStatus::Aborted { .. } => {
                    status.active_transfers = status.active_transfers.saturating_sub(1);
                    status.failed_transfers += 1;
                }
            },
            SyncEvent::RepoConfigChanged { .. } => {}
        });
        debug!(repository = %self.repository, event = event.name(), "Status updated");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_core::domain::CmisError;
    use reposync_core::events::{ChangeEvent, ChangeType, ObjectType, TransmissionEvent, TransmissionType};

    #[tokio::test]
    async fn test_connection_state_follows_events() {
        let reporter = StatusReporter::new("repo");
        let mut rx = reporter.subscribe();
        assert_eq!(reporter.current().connection, ConnectionState::Disconnected);

        let until = Utc::now();
        let denied = SyncEvent::PermissionDenied {
            blocked_until: Some(until),
            message: "bad password".into(),
        };
        assert!(!reporter.handle(&denied).await.unwrap());
        assert!(rx.has_changed().unwrap());
        let status = rx.borrow_and_update().clone();
        assert_eq!(
            status.connection,
            ConnectionState::Blocked { until: Some(until) }
        );
        assert_eq!(status.last_error.as_deref(), Some("bad password"));

        let lost = SyncEvent::ConnectionException {
            cause: CmisError::Connection("reset".into()),
        };
        reporter.handle(&lost).await.unwrap();
        assert_eq!(reporter.current().connection, ConnectionState::Disconnected);

        reporter
            .handle(&SyncEvent::ProxyAuthRequired {
                message: "proxy".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            reporter.current().connection,
            ConnectionState::ProxyAuthRequired
        );
    }

    #[tokio::test]
    async fn test_transfers_and_changes_are_counted() {
        let reporter = StatusReporter::new("repo");
        let started: SyncEvent =
            TransmissionEvent::new("a.txt", TransmissionType::Download, TransmissionStatus::Started)
                .into();
        let finished: SyncEvent =
            TransmissionEvent::new("a.txt", TransmissionType::Download, TransmissionStatus::Finished)
                .into();
        let aborted: SyncEvent = TransmissionEvent::new(
            "b.txt",
            TransmissionType::Upload,
            TransmissionStatus::Aborted {
                reason: "x".into(),
            },
        )
        .into();

        reporter.handle(&started).await.unwrap();
        reporter.handle(&started).await.unwrap();
        assert_eq!(reporter.current().active_transfers, 2);
        reporter.handle(&finished).await.unwrap();
        reporter.handle(&aborted).await.unwrap();
        reporter.handle(&aborted).await.unwrap();

        let change: SyncEvent = ChangeEvent::local(ChangeType::Created, ObjectType::File, "a").into();
        reporter.handle(&change).await.unwrap();
        reporter.handle(&SyncEvent::start_next_sync(false)).await.unwrap();

        let status = reporter.current();
        assert_eq!(status.active_transfers, 0);
        assert_eq!(status.completed_transfers, 1);
        assert_eq!(status.failed_transfers, 2);
        assert_eq!(status.changes_seen, 1);
        assert!(status.last_sync_requested.is_some());
    }
}
