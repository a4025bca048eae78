//! Persistence ports (driven/secondary ports)
//!
//! This module defines the narrow interfaces through which the sync handlers
//! read and write durable state: the mapped-object table, the set of ignored
//! folders and the in-flight file transmissions.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, in-memory, etc.) and don't need domain-level classification.
//! - Paths are relative to the repository's local root.
//! - Local paths of mapped objects are derived by walking `parent_id`s; the
//!   provided methods on [`IMetaDataStorage`] do this on top of the required
//!   lookups so adapters don't have to.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChangeToken, MappedObject, RemoteId};
use crate::events::TransmissionType;

// ============================================================================
// IMetaDataStorage
// ============================================================================

/// Storage of [`MappedObject`] records and the change-log position
#[async_trait]
pub trait IMetaDataStorage: Send + Sync {
    /// Insert or update a record, keyed by its remote id
    async fn save_mapped_object(&self, object: &MappedObject) -> anyhow::Result<()>;

    /// Look a record up by remote id
    async fn get_object_by_remote_id(
        &self,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<MappedObject>>;

    /// Records whose `parent_id` equals `parent_id`
    async fn get_children(&self, parent_id: &RemoteId) -> anyhow::Result<Vec<MappedObject>>;

    /// The root record (the only one without a parent), if persisted
    async fn get_root(&self) -> anyhow::Result<Option<MappedObject>>;

    /// Remove a record and all records below it
    async fn remove_object(&self, remote_id: &RemoteId) -> anyhow::Result<()>;

    /// Last change-log token the repository was synchronized up to
    async fn get_change_log_token(&self) -> anyhow::Result<Option<ChangeToken>>;

    /// Store (or clear) the change-log token
    async fn set_change_log_token(&self, token: Option<&ChangeToken>) -> anyhow::Result<()>;

    /// Path of a record relative to the local root
    ///
    /// Returns `None` when the chain of parents is broken. The root maps to
    /// the empty path.
    async fn get_relative_path(&self, object: &MappedObject) -> anyhow::Result<Option<PathBuf>> {
        let mut segments = Vec::new();
        let mut current = object.clone();
        while let Some(parent_id) = current.parent_id.clone() {
            segments.push(current.name.clone());
            match self.get_object_by_remote_id(&parent_id).await? {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
        Ok(Some(segments.iter().rev().collect()))
    }

    /// Find the record stored for a path relative to the local root
    async fn get_object_by_relative_path(
        &self,
        path: &Path,
    ) -> anyhow::Result<Option<MappedObject>> {
        let Some(mut current) = self.get_root().await? else {
            return Ok(None);
        };

        for component in path.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name.to_string_lossy();
            let children = self.get_children(&current.remote_id).await?;
            match children.into_iter().find(|child| child.name == name) {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }
}

// ============================================================================
// IIgnoredEntitiesStorage
// ============================================================================

/// A remote folder excluded from synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredEntity {
    pub remote_id: RemoteId,
    /// Local path relative to the root
    pub local_path: PathBuf,
}

/// Storage of selectively ignored folders
#[async_trait]
pub trait IIgnoredEntitiesStorage: Send + Sync {
    /// Insert or replace an entry
    async fn add(&self, entity: &IgnoredEntity) -> anyhow::Result<()>;

    /// Remove the entry for a remote id (no-op if absent)
    async fn remove(&self, remote_id: &RemoteId) -> anyhow::Result<()>;

    /// All ignored folders
    async fn list(&self) -> anyhow::Result<Vec<IgnoredEntity>>;

    /// Returns true if the remote id itself is ignored
    async fn is_ignored_id(&self, remote_id: &RemoteId) -> anyhow::Result<bool> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|entity| &entity.remote_id == remote_id))
    }

    /// Returns true if the path is an ignored folder or lies below one
    async fn is_ignored_path(&self, path: &Path) -> anyhow::Result<bool> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|entity| path.starts_with(&entity.local_path)))
    }
}

// ============================================================================
// IFileTransmissionStorage
// ============================================================================

/// A transfer that was started but not yet confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransmission {
    /// Local path relative to the root
    pub path: PathBuf,
    pub remote_id: Option<RemoteId>,
    pub direction: TransmissionType,
    pub started_at: DateTime<Utc>,
    pub total_bytes: Option<u64>,
}

/// Storage of in-flight transfers, so interrupted ones can be detected
#[async_trait]
pub trait IFileTransmissionStorage: Send + Sync {
    /// Record a transfer as started (replaces any previous one for the path)
    async fn save_transmission(&self, transmission: &FileTransmission) -> anyhow::Result<()>;

    /// Remove the transfer recorded for a path
    async fn remove_transmission(&self, path: &Path) -> anyhow::Result<()>;

    /// Transfer recorded for a path
    async fn get_transmission(&self, path: &Path) -> anyhow::Result<Option<FileTransmission>>;

    /// All recorded transfers
    async fn list_transmissions(&self) -> anyhow::Result<Vec<FileTransmission>>;
}
