//! Applies change events to the other side
//!
//! The lowest-priority per-session handler. Remote changes are written
//! to the local folder, local changes are sent to the repository, and
//! the mapping storage is updated after each successful step.
//!
//! ## Conflicts
//!
//! A remote update never overwrites unsynced local edits: the local file
//! is first moved aside to a conflict copy. A remote removal of a file or
//! folder with local edits keeps the local data and only forgets the
//! mapping.
//!
//! ## Failures
//!
//! Connection failures and cancellation are returned to the event manager
//! unchanged. Any other failure re-posts the event with a higher retry
//! count until `max_retries` is reached; after that the error is returned.

use std::future::Future;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use reposync_core::domain::{CmisError, ContentHash, MappedObject, MappedObjectType, RemoteId};
use reposync_core::events::{
    ChangeEvent, ChangeType, SyncEvent, TransmissionEvent, TransmissionStatus, TransmissionType,
};
use reposync_core::ports::{FileTransmission, RemoteObject};
use tracing::{debug, info, instrument, warn};

use crate::context::SessionContext;
use crate::crawler::locally_modified;
use crate::events::{priorities, ISyncEventHandler};
use crate::filesystem::{sha256_bytes, LocalEntry};
use crate::SyncError;

pub struct SyncMechanism {
    context: SessionContext,
}

impl SyncMechanism {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    async fn apply(&self, change: &ChangeEvent) -> Result<(), SyncError> {
        self.context.check_cancelled()?;
        if change.is_remote() {
            match change.change() {
                ChangeType::Removed => self.remote_removed(change).await,
                _ => match change.remote_object() {
                    Some(object) => self.remote_upsert(object).await,
                    None => Err(SyncError::InvalidState(format!(
                        "remote change without object: {change}"
                    ))),
                },
            }
        } else {
            let Some(path) = change.local_path() else {
                return Err(SyncError::InvalidState(format!(
                    "local change without path: {change}"
                )));
            };
            match change.change() {
                ChangeType::Created | ChangeType::Changed => self.local_upsert(change, path).await,
                ChangeType::Removed => self.local_removed(change, path).await,
                ChangeType::Moved => self.local_moved(change, path).await,
            }
        }
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    async fn stored(&self, remote_id: Option<&RemoteId>, path: Option<&Path>) -> Result<Option<MappedObject>, SyncError> {
        let metadata = &self.context.stores.metadata;
        if let Some(remote_id) = remote_id {
            if let Some(stored) = metadata.get_object_by_remote_id(remote_id).await? {
                return Ok(Some(stored));
            }
        }
        match path {
            Some(path) => Ok(metadata
                .get_object_by_relative_path(path)
                .await?
                .filter(|stored| !stored.is_root())),
            None => Ok(None),
        }
    }

    async fn stored_path(&self, stored: &MappedObject) -> Result<PathBuf, SyncError> {
        self.context
            .stores
            .metadata
            .get_relative_path(stored)
            .await?
            .ok_or_else(|| SyncError::InvalidState(format!("no local path for {}", stored.remote_id)))
    }

    /// Mapping of the folder a local path lives in
    async fn local_parent(&self, path: &Path) -> Result<MappedObject, SyncError> {
        let parent = path.parent().unwrap_or(Path::new(""));
        self.context
            .stores
            .metadata
            .get_object_by_relative_path(parent)
            .await?
            .ok_or_else(|| {
                SyncError::InvalidState(format!("parent of {} is not synced yet", path.display()))
            })
    }

    /// Run one transfer, recording it while it is in flight
    async fn transfer<T, F>(
        &self,
        path: &Path,
        remote_id: Option<&RemoteId>,
        direction: TransmissionType,
        total_bytes: Option<u64>,
        operation: F,
    ) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, CmisError>> + Send,
        T: Send,
    {
        let transmissions = &self.context.stores.transmissions;
        transmissions
            .save_transmission(&FileTransmission {
                path: path.to_path_buf(),
                remote_id: remote_id.cloned(),
                direction,
                started_at: Utc::now(),
                total_bytes,
            })
            .await?;
        self.context.queue.add_event(
            TransmissionEvent::new(path, direction, TransmissionStatus::Started).into(),
        );

        let result = operation.await;
        transmissions.remove_transmission(path).await?;

        match result {
            Ok(value) => {
                let mut event =
                    TransmissionEvent::new(path, direction, TransmissionStatus::Finished);
                if let Some(bytes) = total_bytes {
                    event = event.with_bytes(bytes);
                }
                self.context.queue.add_event(event.into());
                Ok(value)
            }
            Err(e) => {
                self.context.queue.add_event(
                    TransmissionEvent::new(
                        path,
                        direction,
                        TransmissionStatus::Aborted {
                            reason: e.to_string(),
                        },
                    )
                    .into(),
                );
                Err(e.into())
            }
        }
    }

    /// Copy the state of a remote object into its mapping
    async fn save_remote_state(
        &self,
        record: &mut MappedObject,
        object: &RemoteObject,
        path: &Path,
        checksum: Option<ContentHash>,
    ) -> Result<(), SyncError> {
        record.parent_id = object.parent_id.clone();
        record.name = object.name.clone();
        record.change_token = object.change_token.clone();
        record.last_remote_write = object.last_modified;
        if let Some(checksum) = checksum {
            record.checksum = Some(checksum);
        }
        if !record.is_folder() {
            record.content_size = object.content_length.or(record.content_size);
            record.last_local_write = self
                .context
                .local
                .stat(path)
                .await?
                .and_then(|entry| entry.modified);
        }
        self.context.stores.metadata.save_mapped_object(record).await?;
        Ok(())
    }

    // ========================================================================
    // Remote to local
    // ========================================================================

    async fn remote_target(&self, object: &RemoteObject, parent_id: &RemoteId) -> Result<PathBuf, SyncError> {
        let parent = self
            .context
            .stores
            .metadata
            .get_object_by_remote_id(parent_id)
            .await?
            .ok_or_else(|| SyncError::InvalidState(format!("parent {parent_id} is not synced yet")))?;
        Ok(self.stored_path(&parent).await?.join(&object.name))
    }

    #[instrument(skip_all, fields(remote_id = %object.id, name = %object.name))]
    async fn remote_upsert(&self, object: &RemoteObject) -> Result<(), SyncError> {
        let Some(parent_id) = &object.parent_id else {
            debug!("Root folder changed, nothing to apply");
            return Ok(());
        };
        let target = self.remote_target(object, parent_id).await?;
        let stored = self.stored(Some(&object.id), None).await?;
        let known = stored.is_some();

        let mut record = match stored {
            Some(stored) => {
                let current = self.stored_path(&stored).await?;
                if current != target && self.context.local.stat(&current).await?.is_some() {
                    info!(from = %current.display(), to = %target.display(), "Moving local entry after remote move");
                    self.context.local.rename(&current, &target).await?;
                }
                stored
            }
            None => MappedObject::new(
                object.id.clone(),
                Some(parent_id.clone()),
                object.object_type,
                &object.name,
            ),
        };

        if object.is_folder() {
            self.context.local.create_dir(&target).await?;
            return self.save_remote_state(&mut record, object, &target, None).await;
        }

        let local = self.context.local.stat(&target).await?;
        if let Some(entry) = &local {
            if entry.is_dir {
                return Err(SyncError::InvalidState(format!(
                    "local folder {} is in the way of a remote file",
                    target.display()
                )));
            }
        }
        if known && local.is_some() && !remote_content_changed(&record, object) {
            debug!("Content unchanged, updating metadata only");
            return self.save_remote_state(&mut record, object, &target, None).await;
        }

        let data = self
            .transfer(
                &target,
                Some(&object.id),
                TransmissionType::Download,
                object.content_length,
                self.context.session.get_content(&object.id),
            )
            .await?;
        let checksum = sha256_bytes(&data);

        if let Some(entry) = &local {
            self.protect_local_edits(&target, entry, known.then_some(&record), &checksum)
                .await?;
        }
        self.context.local.write_atomic(&target, &data).await?;
        info!(path = %target.display(), bytes = data.len(), "Downloaded");

        let mut object = object.clone();
        object.content_length = Some(data.len() as u64);
        self.save_remote_state(&mut record, &object, &target, Some(checksum))
            .await
    }

    /// Move unsynced local content out of the way of a download
    async fn protect_local_edits(
        &self,
        path: &Path,
        entry: &LocalEntry,
        record: Option<&MappedObject>,
        incoming: &ContentHash,
    ) -> Result<(), SyncError> {
        let modified = record.map_or(true, |record| locally_modified(record, entry));
        if !modified {
            return Ok(());
        }
        if self.context.local.checksum(path).await? == *incoming {
            return Ok(());
        }
        let copy = self.context.local.conflict_copy(path).await?;
        warn!(
            path = %path.display(),
            copy = %copy.display(),
            "Local edits conflict with remote update, kept as conflict copy"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(event = %change))]
    async fn remote_removed(&self, change: &ChangeEvent) -> Result<(), SyncError> {
        let Some(stored) = self.stored(change.remote_id(), change.local_path()).await? else {
            debug!("Removed object is not mapped");
            return Ok(());
        };
        let path = match change.local_path() {
            Some(path) => path.to_path_buf(),
            None => self.stored_path(&stored).await?,
        };

        match self.context.local.stat(&path).await? {
            Some(entry) if self.has_local_changes(&path, &stored, &entry).await? => {
                warn!(path = %path.display(), "Removed on the server but changed locally, keeping local copy");
            }
            Some(_) => {
                self.context.local.delete(&path).await?;
                info!(path = %path.display(), "Removed locally after remote removal");
            }
            None => {}
        }
        self.context
            .stores
            .metadata
            .remove_object(&stored.remote_id)
            .await?;
        Ok(())
    }

    /// Returns true if the local entry holds anything not yet on the server
    async fn has_local_changes(
        &self,
        path: &Path,
        stored: &MappedObject,
        entry: &LocalEntry,
    ) -> Result<bool, SyncError> {
        if !entry.is_dir {
            return Ok(!stored.is_folder() && locally_modified(stored, entry));
        }

        let metadata = &self.context.stores.metadata;
        let mut pending = vec![(path.to_path_buf(), stored.remote_id.clone())];
        while let Some((dir, remote_id)) = pending.pop() {
            let children = metadata.get_children(&remote_id).await?;
            for (name, child_entry) in self.context.local.list_dir(&dir).await? {
                let Some(child) = children.iter().find(|c| c.name == name) else {
                    return Ok(true);
                };
                if child_entry.is_dir {
                    pending.push((dir.join(&name), child.remote_id.clone()));
                } else if locally_modified(child, &child_entry) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // ========================================================================
    // Local to remote
    // ========================================================================

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn local_upsert(&self, change: &ChangeEvent, path: &Path) -> Result<(), SyncError> {
        let Some(entry) = self.context.local.stat(path).await? else {
            debug!("Local entry vanished before it could be synced");
            return Ok(());
        };

        match self.stored(change.remote_id(), Some(path)).await? {
            Some(record) if record.is_folder() => Ok(()),
            Some(record) => self.upload_changed(record, path).await,
            None if entry.is_dir => self.create_remote_folder(path).await,
            None => self.create_remote_document(path).await,
        }
    }

    async fn create_remote_folder(&self, path: &Path) -> Result<(), SyncError> {
        let parent = self.local_parent(path).await?;
        let name = file_name(path)?;
        let object = match self
            .context
            .session
            .create_folder(&parent.remote_id, &name)
            .await
        {
            Ok(object) => object,
            Err(CmisError::Constraint(reason)) => {
                debug!(%reason, "Folder exists on the server, adopting it");
                self.remote_child(&parent.remote_id, &name, reason).await?
            }
            Err(e) => return Err(e.into()),
        };

        let mut record = MappedObject::new(
            object.id.clone(),
            Some(parent.remote_id),
            MappedObjectType::Folder,
            &object.name,
        );
        self.save_remote_state(&mut record, &object, path, None).await?;
        info!("Created remote folder");
        Ok(())
    }

    async fn create_remote_document(&self, path: &Path) -> Result<(), SyncError> {
        let parent = self.local_parent(path).await?;
        let name = file_name(path)?;
        let data = self.context.local.read(path).await?;
        let checksum = sha256_bytes(&data);
        let size = data.len() as u64;

        let session = &self.context.session;
        let created = self
            .transfer(
                path,
                None,
                TransmissionType::Upload,
                Some(size),
                session.create_document(&parent.remote_id, &name, data.clone()),
            )
            .await;
        let object = match created {
            Ok(object) => object,
            Err(SyncError::Remote(CmisError::Constraint(reason))) => {
                debug!(%reason, "Document exists on the server, replacing its content");
                let existing = self.remote_child(&parent.remote_id, &name, reason).await?;
                self.transfer(
                    path,
                    Some(&existing.id),
                    TransmissionType::Upload,
                    Some(size),
                    session.set_content(&existing.id, data),
                )
                .await?
            }
            Err(e) => return Err(e),
        };

        let mut record = MappedObject::new(
            object.id.clone(),
            Some(parent.remote_id),
            MappedObjectType::File,
            &object.name,
        );
        self.save_remote_state(&mut record, &object, path, Some(checksum))
            .await?;
        info!(bytes = size, "Uploaded new file");
        Ok(())
    }

    async fn remote_child(
        &self,
        parent_id: &RemoteId,
        name: &str,
        reason: String,
    ) -> Result<RemoteObject, SyncError> {
        self.context
            .session
            .get_children(parent_id)
            .await?
            .into_iter()
            .find(|child| child.name == name)
            .ok_or(SyncError::Remote(CmisError::Constraint(reason)))
    }

    async fn upload_changed(&self, mut record: MappedObject, path: &Path) -> Result<(), SyncError> {
        let data = self.context.local.read(path).await?;
        let checksum = sha256_bytes(&data);
        if record.checksum.as_ref() == Some(&checksum) {
            debug!("Content unchanged, refreshing timestamps");
            let entry = self.context.local.stat(path).await?;
            record.last_local_write = entry.as_ref().and_then(|e| e.modified);
            record.content_size = entry.map(|e| e.size);
            self.context.stores.metadata.save_mapped_object(&record).await?;
            return Ok(());
        }

        let size = data.len() as u64;
        let object = self
            .transfer(
                path,
                Some(&record.remote_id),
                TransmissionType::Upload,
                Some(size),
                self.context.session.set_content(&record.remote_id, data),
            )
            .await?;
        self.save_remote_state(&mut record, &object, path, Some(checksum))
            .await?;
        info!(bytes = size, "Uploaded changed file");
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn local_removed(&self, change: &ChangeEvent, path: &Path) -> Result<(), SyncError> {
        let Some(record) = self.stored(change.remote_id(), Some(path)).await? else {
            debug!("Removed entry was never synced");
            return Ok(());
        };
        match self.context.session.delete_object(&record.remote_id).await {
            Ok(()) => info!("Removed on the server"),
            Err(CmisError::ObjectNotFound(_)) => debug!("Already gone on the server"),
            Err(e) => return Err(e.into()),
        }
        self.context
            .stores
            .metadata
            .remove_object(&record.remote_id)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn local_moved(&self, change: &ChangeEvent, path: &Path) -> Result<(), SyncError> {
        let Some(mut record) = self.stored(change.remote_id(), change.old_local_path()).await? else {
            debug!("Move source was never synced, treating as creation");
            return self.local_upsert(change, path).await;
        };
        let parent = self.local_parent(path).await?;
        let name = file_name(path)?;
        let session = &self.context.session;

        let mut object = None;
        if let Some(source) = record.parent_id.clone().filter(|p| *p != parent.remote_id) {
            object = Some(
                session
                    .move_object(&record.remote_id, &source, &parent.remote_id)
                    .await?,
            );
        }
        if record.name != name {
            object = Some(session.rename_object(&record.remote_id, &name).await?);
        }
        let Some(object) = object else {
            return Ok(());
        };

        info!(from = ?change.old_local_path(), "Moved on the server");
        self.save_remote_state(&mut record, &object, path, None).await?;
        if !record.is_folder() {
            self.upload_changed(record, path).await?;
        }
        Ok(())
    }
}

/// Returns true if the remote object reports other content than was synced
fn remote_content_changed(record: &MappedObject, object: &RemoteObject) -> bool {
    if record.checksum.is_none() {
        return true;
    }
    if let Some(hash) = &object.content_hash {
        return record.checksum.as_ref() != Some(hash);
    }
    if object.content_length.is_some() && object.content_length != record.content_size {
        return true;
    }
    match (object.last_modified, record.last_remote_write) {
        (Some(remote), Some(synced)) => remote > synced,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn file_name(path: &Path) -> Result<String, SyncError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::InvalidState(format!("{} has no file name", path.display())))
}

#[async_trait]
impl ISyncEventHandler for SyncMechanism {
    fn priority(&self) -> i32 {
        priorities::SYNC_MECHANISM
    }

    fn name(&self) -> &str {
        "SyncMechanism"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let Some(change) = event.as_change() else {
            return Ok(false);
        };
        match self.apply(change).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_connection() || matches!(e, SyncError::Cancelled) => Err(e),
            Err(e) if change.retry_count() < self.context.max_retries => {
                warn!(
                    event = %change,
                    attempt = change.retry_count() + 1,
                    error = %e,
                    "Sync step failed, will retry"
                );
                self.context.queue.add_event(change.retried().into());
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}
