//! Selectively ignored folders
//!
//! Repositories with selective-ignore support flag folders the user chose
//! not to sync on this device. The transformer keeps the ignored-entities
//! storage in step with those flags; the filter drops every change that
//! lies inside an ignored folder.

use std::path::PathBuf;

use async_trait::async_trait;
use reposync_core::events::SyncEvent;
use reposync_core::ports::{IgnoredEntity, RemoteObject};
use tracing::{debug, info};

use crate::context::SessionContext;
use crate::events::{priorities, ISyncEventHandler};
use crate::SyncError;

/// Records folders whose ignore flag was set or cleared
pub struct SelectiveIgnoreEventTransformer {
    context: SessionContext,
}

impl SelectiveIgnoreEventTransformer {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    /// Local path of a remote folder, from the event or the stored mapping
    async fn local_path(
        &self,
        object: &RemoteObject,
        event_path: Option<PathBuf>,
    ) -> Result<Option<PathBuf>, SyncError> {
        if event_path.is_some() {
            return Ok(event_path);
        }
        let metadata = &self.context.stores.metadata;
        if let Some(stored) = metadata.get_object_by_remote_id(&object.id).await? {
            return Ok(metadata.get_relative_path(&stored).await?);
        }
        let Some(parent_id) = &object.parent_id else {
            return Ok(None);
        };
        let Some(parent) = metadata.get_object_by_remote_id(parent_id).await? else {
            return Ok(None);
        };
        Ok(metadata
            .get_relative_path(&parent)
            .await?
            .map(|path| path.join(&object.name)))
    }
}

#[async_trait]
impl ISyncEventHandler for SelectiveIgnoreEventTransformer {
    fn priority(&self) -> i32 {
        priorities::SELECTIVE_IGNORE_TRANSFORMER
    }

    fn name(&self) -> &str {
        "SelectiveIgnoreEventTransformer"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let Some(change) = event.as_change() else {
            return Ok(false);
        };
        let Some(object) = change.remote_object().filter(|o| o.is_folder()) else {
            return Ok(false);
        };

        let ignored = &self.context.stores.ignored;
        let recorded = ignored.is_ignored_id(&object.id).await?;

        if object.ignored {
            if !recorded {
                let event_path = change.local_path().map(PathBuf::from);
                let Some(local_path) = self.local_path(object, event_path).await? else {
                    debug!(remote_id = %object.id, "Ignored folder has no local place yet");
                    return Ok(true);
                };
                info!(path = %local_path.display(), "Folder is now ignored");
                ignored
                    .add(&IgnoredEntity {
                        remote_id: object.id.clone(),
                        local_path,
                    })
                    .await?;
            }
            return Ok(true);
        }

        if recorded {
            info!(remote_id = %object.id, "Folder is no longer ignored, requesting full sync");
            ignored.remove(&object.id).await?;
            self.context.queue.add_event(SyncEvent::start_next_sync(true));
        }
        Ok(false)
    }
}

/// Drops changes inside ignored folders
pub struct SelectiveIgnoreFilter {
    context: SessionContext,
}

impl SelectiveIgnoreFilter {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ISyncEventHandler for SelectiveIgnoreFilter {
    fn priority(&self) -> i32 {
        priorities::FILTER
    }

    fn name(&self) -> &str {
        "SelectiveIgnoreFilter"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let Some(change) = event.as_change() else {
            return Ok(false);
        };
        let entities = self.context.stores.ignored.list().await?;
        if entities.is_empty() {
            return Ok(false);
        }

        let parent_id = change.remote_object().and_then(|o| o.parent_id.as_ref());
        let dropped = entities.iter().any(|entity| {
            change.remote_id() == Some(&entity.remote_id)
                || parent_id == Some(&entity.remote_id)
                || change
                    .local_path()
                    .is_some_and(|path| path.starts_with(&entity.local_path))
        });
        if dropped {
            debug!(event = %change, "Dropping change inside ignored folder");
        }
        Ok(dropped)
    }
}
