//! State shared by the handlers installed for one session

use std::sync::Arc;

use reposync_core::ports::{
    IFileTransmissionStorage, IIgnoredEntitiesStorage, IMetaDataStorage, ISession,
};
use tokio_util::sync::CancellationToken;

use crate::events::ISyncEventQueue;
use crate::filesystem::LocalFileSystem;
use crate::SyncError;

/// Storage collaborators of one repository
#[derive(Clone)]
pub struct SyncStores {
    pub metadata: Arc<dyn IMetaDataStorage>,
    pub ignored: Arc<dyn IIgnoredEntitiesStorage>,
    pub transmissions: Arc<dyn IFileTransmissionStorage>,
}

/// Everything a per-session handler needs
///
/// Built by the initializer on every login. The `cancel` token is
/// cancelled when the next login replaces the handler set.
#[derive(Clone)]
pub struct SessionContext {
    pub repository: String,
    pub session: Arc<dyn ISession>,
    pub queue: Arc<dyn ISyncEventQueue>,
    pub stores: SyncStores,
    pub local: LocalFileSystem,
    pub max_retries: u32,
    pub cancel: CancellationToken,
}

impl SessionContext {
    /// Fail with [`SyncError::Cancelled`] once the session was superseded
    pub fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
