//! Completes remote change events with the current object

use async_trait::async_trait;
use reposync_core::domain::{CmisError, RemoteId};
use reposync_core::events::{ChangeEvent, ChangeType, ObjectType, SyncEvent};
use tracing::debug;

use crate::context::SessionContext;
use crate::events::{priorities, ISyncEventHandler};
use crate::SyncError;

/// Replaces bare remote change events with ones carrying the fetched object
///
/// Change-log entries only name the object. The replacement event is
/// posted to the queue and the original consumed. Objects that vanished
/// in the meantime become removals.
pub struct RemoteObjectFetcher {
    context: SessionContext,
}

impl RemoteObjectFetcher {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    async fn stored_path(&self, remote_id: &RemoteId) -> Result<Option<std::path::PathBuf>, SyncError> {
        let metadata = &self.context.stores.metadata;
        match metadata.get_object_by_remote_id(remote_id).await? {
            Some(stored) => Ok(metadata.get_relative_path(&stored).await?),
            None => Ok(None),
        }
    }

    /// Post a removal for a mapped object; unmapped objects need nothing
    async fn post_removal(&self, change: &ChangeEvent, remote_id: &RemoteId) -> Result<(), SyncError> {
        match self.stored_path(remote_id).await? {
            Some(path) => {
                let object_type = if change.object_type() == ObjectType::Unknown {
                    match self
                        .context
                        .stores
                        .metadata
                        .get_object_by_remote_id(remote_id)
                        .await?
                    {
                        Some(stored) if stored.is_folder() => ObjectType::Folder,
                        _ => ObjectType::File,
                    }
                } else {
                    change.object_type()
                };
                let removal = ChangeEvent::remote(ChangeType::Removed, object_type, remote_id.clone())
                    .with_local_path(path);
                self.context.queue.add_event(removal.into());
            }
            None => debug!(remote_id = %remote_id, "Removed object was never synced"),
        }
        Ok(())
    }
}

#[async_trait]
impl ISyncEventHandler for RemoteObjectFetcher {
    fn priority(&self) -> i32 {
        priorities::REMOTE_OBJECT_FETCHER
    }

    fn name(&self) -> &str {
        "RemoteObjectFetcher"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let Some(change) = event.as_change() else {
            return Ok(false);
        };
        if !change.is_remote() || change.remote_object().is_some() {
            return Ok(false);
        }
        let Some(remote_id) = change.remote_id().cloned() else {
            return Ok(false);
        };

        if change.change() == ChangeType::Removed {
            if change.local_path().is_some() {
                return Ok(false);
            }
            self.post_removal(change, &remote_id).await?;
            return Ok(true);
        }

        match self.context.session.get_object(&remote_id).await {
            Ok(object) => {
                debug!(remote_id = %remote_id, "Fetched remote object");
                self.context
                    .queue
                    .add_event(change.clone().with_remote_object(object).into());
            }
            Err(CmisError::ObjectNotFound(_)) => {
                debug!(remote_id = %remote_id, "Changed object no longer exists");
                self.post_removal(change, &remote_id).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }
}
