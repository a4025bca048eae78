//! Persisted local/remote correspondence records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ChangeToken, ContentHash, RemoteId, UniqueId};

/// Kind of object a [`MappedObject`] stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappedObjectType {
    File,
    Folder,
}

impl MappedObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }

    /// Parse the storage representation produced by [`as_str`](Self::as_str)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "folder" => Some(Self::Folder),
            _ => None,
        }
    }
}

/// Durable link between one local entry and one remote object
///
/// The local path of an object is not stored; it is derived from the chain
/// of `parent_id`s up to the root record, whose name is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedObject {
    /// Process-local identifier
    pub id: UniqueId,
    pub remote_id: RemoteId,
    /// Remote id of the parent folder, `None` for the root
    pub parent_id: Option<RemoteId>,
    pub object_type: MappedObjectType,
    /// File or folder name (`/` for the root)
    pub name: String,
    /// Last change token seen on the server
    pub change_token: Option<ChangeToken>,
    pub last_remote_write: Option<DateTime<Utc>>,
    pub last_local_write: Option<DateTime<Utc>>,
    /// Checksum of the content at the last successful transfer
    pub checksum: Option<ContentHash>,
    pub content_size: Option<u64>,
}

impl MappedObject {
    /// Name used for the record of the repository root
    pub const ROOT_NAME: &'static str = "/";

    /// Create a record with no timestamps or checksum yet
    pub fn new(
        remote_id: RemoteId,
        parent_id: Option<RemoteId>,
        object_type: MappedObjectType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: UniqueId::new(),
            remote_id,
            parent_id,
            object_type,
            name: name.into(),
            change_token: None,
            last_remote_write: None,
            last_local_write: None,
            checksum: None,
            content_size: None,
        }
    }

    /// Record for the repository root folder
    pub fn root(remote_id: RemoteId, change_token: Option<ChangeToken>) -> Self {
        let mut root = Self::new(remote_id, None, MappedObjectType::Folder, Self::ROOT_NAME);
        root.change_token = change_token;
        root
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_folder(&self) -> bool {
        self.object_type == MappedObjectType::Folder
    }
}
