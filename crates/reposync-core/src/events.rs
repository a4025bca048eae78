//! Sync events
//!
//! Every piece of work in the agent travels through the event queue as a
//! [`SyncEvent`]. Events are immutable: a handler that wants to forward a
//! modified event builds a new one (see the `with_*` methods on
//! [`ChangeEvent`]) and enqueues it, it never edits the event it was given.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CmisError, RemoteId, RepoInfo, UniqueId};
use crate::ports::session::{ISession, RemoteObject};

// ============================================================================
// Categories
// ============================================================================

/// Countable event categories reported to queue observers
pub mod categories {
    /// File or folder change detected locally or remotely
    pub const DETECTED_CHANGE: &str = "DetectedChange";
    /// Request to run a sync pass
    pub const SYNC_REQUESTED: &str = "SyncRequested";
    /// Upload or download progress
    pub const TRANSMISSION: &str = "Transmission";
}

// ============================================================================
// Change events
// ============================================================================

/// Kind of object a change refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    File,
    Folder,
    /// Not known yet (e.g. a change-log entry before the object is fetched)
    Unknown,
}

/// Side on which a change was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeSource {
    Local,
    Remote,
}

/// What happened to the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Changed,
    Removed,
    Moved,
}

/// A detected file or folder change
///
/// Paths are relative to the repository's local root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    id: UniqueId,
    object_type: ObjectType,
    source: ChangeSource,
    change: ChangeType,
    local_path: Option<PathBuf>,
    old_local_path: Option<PathBuf>,
    remote_id: Option<RemoteId>,
    remote_object: Option<RemoteObject>,
    retry_count: u32,
}

impl ChangeEvent {
    fn new(source: ChangeSource, change: ChangeType, object_type: ObjectType) -> Self {
        Self {
            id: UniqueId::new(),
            object_type,
            source,
            change,
            local_path: None,
            old_local_path: None,
            remote_id: None,
            remote_object: None,
            retry_count: 0,
        }
    }

    /// Change observed in the local tree
    pub fn local(change: ChangeType, object_type: ObjectType, path: impl Into<PathBuf>) -> Self {
        let mut event = Self::new(ChangeSource::Local, change, object_type);
        event.local_path = Some(path.into());
        event
    }

    /// Change observed on the repository
    pub fn remote(change: ChangeType, object_type: ObjectType, remote_id: RemoteId) -> Self {
        let mut event = Self::new(ChangeSource::Remote, change, object_type);
        event.remote_id = Some(remote_id);
        event
    }

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn source(&self) -> ChangeSource {
        self.source
    }

    pub fn change(&self) -> ChangeType {
        self.change
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Path before the move, for [`ChangeType::Moved`]
    pub fn old_local_path(&self) -> Option<&Path> {
        self.old_local_path.as_deref()
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    /// Remote object, once it has been fetched
    pub fn remote_object(&self) -> Option<&RemoteObject> {
        self.remote_object.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_local(&self) -> bool {
        self.source == ChangeSource::Local
    }

    pub fn is_remote(&self) -> bool {
        self.source == ChangeSource::Remote
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_old_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.old_local_path = Some(path.into());
        self
    }

    pub fn with_remote_id(mut self, remote_id: RemoteId) -> Self {
        self.remote_id = Some(remote_id);
        self
    }

    pub fn with_change(mut self, change: ChangeType) -> Self {
        self.change = change;
        self
    }

    /// Attach the fetched remote object; the object type follows it
    pub fn with_remote_object(mut self, object: RemoteObject) -> Self {
        self.object_type = if object.is_folder() {
            ObjectType::Folder
        } else {
            ObjectType::File
        };
        self.remote_id = Some(object.id.clone());
        self.remote_object = Some(object);
        self
    }

    /// Copy of this event for another attempt
    ///
    /// The copy gets a new id and a retry counter one higher.
    pub fn retried(&self) -> Self {
        let mut event = self.clone();
        event.id = UniqueId::new();
        event.retry_count = self.retry_count.saturating_add(1);
        event
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?} {:?}", self.source, self.object_type, self.change)?;
        if let Some(path) = &self.local_path {
            write!(f, " {}", path.display())?;
        }
        if let Some(old) = &self.old_local_path {
            write!(f, " (from {})", old.display())?;
        }
        if let Some(id) = &self.remote_id {
            write!(f, " [{id}]")?;
        }
        Ok(())
    }
}

// ============================================================================
// Transmission events
// ============================================================================

/// Direction of a file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransmissionType {
    Upload,
    Download,
}

impl TransmissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "download" => Some(Self::Download),
            _ => None,
        }
    }
}

/// State of a file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmissionStatus {
    Started,
    Finished,
    Aborted { reason: String },
}

/// Progress report of a single upload or download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionEvent {
    pub path: PathBuf,
    pub direction: TransmissionType,
    pub status: TransmissionStatus,
    pub bytes: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl TransmissionEvent {
    pub fn new(path: impl Into<PathBuf>, direction: TransmissionType, status: TransmissionStatus) -> Self {
        Self {
            path: path.into(),
            direction,
            status,
            bytes: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }
}

// ============================================================================
// SyncEvent
// ============================================================================

/// An event flowing through the sync event queue
#[derive(Clone)]
pub enum SyncEvent {
    /// A session was opened; every handler should switch to it
    SuccessfulLogin { session: Arc<dyn ISession> },

    /// Credentials were rejected
    ///
    /// `blocked_until` is the earliest time the scheduler will try again,
    /// `None` if it waits for a configuration change.
    PermissionDenied {
        blocked_until: Option<DateTime<Utc>>,
        message: String,
    },

    /// A proxy demands credentials
    ProxyAuthRequired { message: String },

    /// The current session broke
    ConnectionException { cause: CmisError },

    /// The repository configuration was edited
    RepoConfigChanged { repo_info: RepoInfo },

    /// Request to run a sync pass
    StartNextSync { full_sync_requested: bool },

    /// A detected file or folder change
    Change(ChangeEvent),

    /// Upload or download progress
    Transmission(TransmissionEvent),

    /// An error that is reported but needs no dedicated handling
    Exception { message: String },
}

impl SyncEvent {
    pub fn start_next_sync(full_sync_requested: bool) -> Self {
        Self::StartNextSync {
            full_sync_requested,
        }
    }

    /// Variant name, used as log field
    pub fn name(&self) -> &'static str {
        match self {
            Self::SuccessfulLogin { .. } => "SuccessfulLogin",
            Self::PermissionDenied { .. } => "PermissionDenied",
            Self::ProxyAuthRequired { .. } => "ProxyAuthRequired",
            Self::ConnectionException { .. } => "ConnectionException",
            Self::RepoConfigChanged { .. } => "RepoConfigChanged",
            Self::StartNextSync { .. } => "StartNextSync",
            Self::Change(_) => "Change",
            Self::Transmission(_) => "Transmission",
            Self::Exception { .. } => "Exception",
        }
    }

    /// Category counted by the queue, if the event is countable
    pub fn category(&self) -> Option<&'static str> {
        match self {
            Self::Change(_) => Some(categories::DETECTED_CHANGE),
            Self::StartNextSync { .. } => Some(categories::SYNC_REQUESTED),
            Self::Transmission(_) => Some(categories::TRANSMISSION),
            _ => None,
        }
    }

    /// Retry counter of change events; zero for everything else
    pub fn retry_count(&self) -> u32 {
        match self {
            Self::Change(change) => change.retry_count(),
            _ => 0,
        }
    }

    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            Self::Change(change) => Some(change),
            _ => None,
        }
    }
}

impl From<ChangeEvent> for SyncEvent {
    fn from(event: ChangeEvent) -> Self {
        Self::Change(event)
    }
}

impl From<TransmissionEvent> for SyncEvent {
    fn from(event: TransmissionEvent) -> Self {
        Self::Transmission(event)
    }
}

impl fmt::Debug for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuccessfulLogin { session } => f
                .debug_struct("SuccessfulLogin")
                .field("repository_id", &session.repository_id())
                .finish(),
            Self::PermissionDenied {
                blocked_until,
                message,
            } => f
                .debug_struct("PermissionDenied")
                .field("blocked_until", blocked_until)
                .field("message", message)
                .finish(),
            Self::ProxyAuthRequired { message } => f
                .debug_struct("ProxyAuthRequired")
                .field("message", message)
                .finish(),
            Self::ConnectionException { cause } => f
                .debug_struct("ConnectionException")
                .field("cause", cause)
                .finish(),
            Self::RepoConfigChanged { repo_info } => f
                .debug_struct("RepoConfigChanged")
                .field("repo_info", repo_info)
                .finish(),
            Self::StartNextSync {
                full_sync_requested,
            } => f
                .debug_struct("StartNextSync")
                .field("full_sync_requested", full_sync_requested)
                .finish(),
            Self::Change(change) => f.debug_tuple("Change").field(change).finish(),
            Self::Transmission(transmission) => {
                f.debug_tuple("Transmission").field(transmission).finish()
            }
            Self::Exception { message } => f
                .debug_struct("Exception")
                .field("message", message)
                .finish(),
        }
    }
}
