//! Repository session ports (driven/secondary ports)
//!
//! This module defines the interface for talking to a remote document
//! repository. The session factory is what the connection scheduler calls to
//! log in; the session it returns is published to every handler through the
//! `SuccessfulLogin` event.
//!
//! ## Design Notes
//!
//! - Unlike the storage ports, these methods return [`CmisError`] instead of
//!   `anyhow::Error`: callers branch on the error category (permission
//!   denied, proxy authentication, connection) rather than just logging it.
//! - Sessions are shared as `Arc<dyn ISession>` and never mutated after they
//!   have been published, apart from the default operation context which is
//!   set once right after creation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::IAuthenticationProvider;
use crate::domain::errors::CmisError;
use crate::domain::mapped_object::MappedObjectType;
use crate::domain::newtypes::{ChangeToken, ContentHash, RemoteId};

/// String-keyed parameters used to open a session
///
/// See [`crate::domain::session_keys`] for the recognised keys.
pub type SessionParameters = HashMap<String, String>;

// ============================================================================
// Operation context
// ============================================================================

/// Defaults applied to every request made through a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Properties to request (empty means all)
    pub filter: Vec<String>,
    pub include_allowable_actions: bool,
    pub include_path_segments: bool,
    pub cache_enabled: bool,
    pub max_items_per_page: u32,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self {
            filter: Vec::new(),
            include_allowable_actions: false,
            include_path_segments: true,
            cache_enabled: false,
            max_items_per_page: 1000,
        }
    }
}

/// Context the connection scheduler installs on every new session
///
/// Only the properties the sync handlers actually read are requested.
pub fn sync_operation_context() -> OperationContext {
    OperationContext {
        filter: [
            "cmis:objectId",
            "cmis:objectTypeId",
            "cmis:baseTypeId",
            "cmis:name",
            "cmis:parentId",
            "cmis:changeToken",
            "cmis:lastModificationDate",
            "cmis:contentStreamLength",
            "cmis:contentStreamHash",
            "gds:ignoreDeviceIds",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect(),
        include_allowable_actions: true,
        include_path_segments: true,
        cache_enabled: false,
        max_items_per_page: 1000,
    }
}

// ============================================================================
// Port DTOs
// ============================================================================

/// Capability flags negotiated when the session was opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCapabilities {
    /// Server keeps a change log that can be queried incrementally
    pub change_log: bool,
    /// Server supports flagging folders as ignored for this device
    pub selective_ignore: bool,
}

/// Snapshot of a remote file or folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: RemoteId,
    /// `None` for the root folder
    pub parent_id: Option<RemoteId>,
    pub name: String,
    pub object_type: MappedObjectType,
    pub change_token: Option<ChangeToken>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_length: Option<u64>,
    pub content_hash: Option<ContentHash>,
    /// Folder is flagged as ignored for this device
    pub ignored: bool,
}

impl RemoteObject {
    pub fn is_folder(&self) -> bool {
        self.object_type == MappedObjectType::Folder
    }
}

/// Kind of entry in the repository change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteChangeType {
    Created,
    Updated,
    Deleted,
    Security,
}

/// One change-log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub object_id: RemoteId,
    pub change_type: RemoteChangeType,
    pub change_time: Option<DateTime<Utc>>,
}

/// A page of change-log entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogPage {
    pub entries: Vec<ChangeLogEntry>,
    /// Token to continue from
    pub latest_token: Option<ChangeToken>,
    /// More entries are available after `latest_token`
    pub has_more: bool,
}

// ============================================================================
// ISession
// ============================================================================

/// An authenticated connection to one repository
#[async_trait]
pub trait ISession: Send + Sync {
    /// Id of the repository this session is bound to
    fn repository_id(&self) -> &str;

    /// Capability flags of the repository
    fn capabilities(&self) -> RepositoryCapabilities;

    /// Install the defaults used by subsequent requests
    fn set_default_context(&self, context: OperationContext);

    /// Currently installed defaults
    fn default_context(&self) -> OperationContext;

    /// Fetch the repository root folder
    async fn get_root_folder(&self) -> Result<RemoteObject, CmisError>;

    /// Fetch a single object by id
    async fn get_object(&self, id: &RemoteId) -> Result<RemoteObject, CmisError>;

    /// List the direct children of a folder
    async fn get_children(&self, folder_id: &RemoteId) -> Result<Vec<RemoteObject>, CmisError>;

    /// Read a page of the change log starting after `token`
    async fn get_content_changes(
        &self,
        token: Option<&ChangeToken>,
        max_items: u32,
    ) -> Result<ChangeLogPage, CmisError>;

    /// Current head of the change log
    async fn latest_change_log_token(&self) -> Result<Option<ChangeToken>, CmisError>;

    /// Download the content stream of a document
    async fn get_content(&self, id: &RemoteId) -> Result<Vec<u8>, CmisError>;

    /// Create a folder below `parent_id`
    async fn create_folder(
        &self,
        parent_id: &RemoteId,
        name: &str,
    ) -> Result<RemoteObject, CmisError>;

    /// Create a document with the given content below `parent_id`
    async fn create_document(
        &self,
        parent_id: &RemoteId,
        name: &str,
        content: Vec<u8>,
    ) -> Result<RemoteObject, CmisError>;

    /// Replace the content stream of a document
    async fn set_content(&self, id: &RemoteId, content: Vec<u8>) -> Result<RemoteObject, CmisError>;

    /// Delete an object; folders are deleted with all descendants
    async fn delete_object(&self, id: &RemoteId) -> Result<(), CmisError>;

    /// Move an object from one folder into another
    async fn move_object(
        &self,
        id: &RemoteId,
        source_folder_id: &RemoteId,
        target_folder_id: &RemoteId,
    ) -> Result<RemoteObject, CmisError>;

    /// Rename an object in place
    async fn rename_object(&self, id: &RemoteId, new_name: &str) -> Result<RemoteObject, CmisError>;
}

// ============================================================================
// ISessionFactory
// ============================================================================

/// Opens sessions from a parameter map
#[async_trait]
pub trait ISessionFactory: Send + Sync {
    /// Authenticate and open a session
    ///
    /// # Errors
    ///
    /// - [`CmisError::PermissionDenied`] when the credentials are rejected;
    ///   `retry_hint` carries any "retry not before" value from the server
    /// - [`CmisError::ProxyAuthRequired`] when a proxy demands credentials
    /// - [`CmisError::Connection`] for network failures
    async fn create_session(
        &self,
        parameters: &SessionParameters,
        auth_provider: Option<Arc<dyn IAuthenticationProvider>>,
    ) -> Result<Arc<dyn ISession>, CmisError>;
}
