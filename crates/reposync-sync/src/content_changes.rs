//! Change-log driven incremental sync
//!
//! Installed only for sessions whose repository keeps a change log.
//! A full sync records the current log position and leaves the work to
//! the crawler; a partial sync reads the log from the stored position.

use async_trait::async_trait;
use reposync_core::domain::ChangeToken;
use reposync_core::events::{ChangeEvent, ChangeType, ObjectType, SyncEvent};
use reposync_core::ports::{ChangeLogEntry, RemoteChangeType};
use tracing::{debug, info};

use crate::context::SessionContext;
use crate::events::{priorities, ISyncEventHandler};
use crate::SyncError;

/// Entries requested per change-log page
pub const PAGE_SIZE: u32 = 100;

pub struct ContentChanges {
    context: SessionContext,
}

impl ContentChanges {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    async fn record_latest_token(&self) -> Result<(), SyncError> {
        let token = self.context.session.latest_change_log_token().await?;
        debug!(token = ?token, "Recording change log position before full sync");
        self.context
            .stores
            .metadata
            .set_change_log_token(token.as_ref())
            .await?;
        Ok(())
    }

    /// Post events for every logged change since `token`; returns the new position
    async fn read_log(&self, mut token: ChangeToken) -> Result<(ChangeToken, usize), SyncError> {
        let mut posted = 0;
        loop {
            self.context.check_cancelled()?;
            let page = self
                .context
                .session
                .get_content_changes(Some(&token), PAGE_SIZE)
                .await?;

            for entry in &page.entries {
                if let Some(event) = to_event(entry) {
                    self.context.queue.add_event(event.into());
                    posted += 1;
                }
            }
            if let Some(latest) = page.latest_token {
                token = latest;
            }
            if !page.has_more || page.entries.is_empty() {
                return Ok((token, posted));
            }
        }
    }
}

fn to_event(entry: &ChangeLogEntry) -> Option<ChangeEvent> {
    let change = match entry.change_type {
        RemoteChangeType::Created => ChangeType::Created,
        RemoteChangeType::Updated => ChangeType::Changed,
        RemoteChangeType::Deleted => ChangeType::Removed,
        RemoteChangeType::Security => return None,
    };
    Some(ChangeEvent::remote(
        change,
        ObjectType::Unknown,
        entry.object_id.clone(),
    ))
}

#[async_trait]
impl ISyncEventHandler for ContentChanges {
    fn priority(&self) -> i32 {
        priorities::CONTENT_CHANGES
    }

    fn name(&self) -> &str {
        "ContentChanges"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let SyncEvent::StartNextSync {
            full_sync_requested,
        } = event
        else {
            return Ok(false);
        };

        if *full_sync_requested {
            self.record_latest_token().await?;
            return Ok(false);
        }

        let metadata = &self.context.stores.metadata;
        let Some(token) = metadata.get_change_log_token().await? else {
            debug!("No change log position stored, requesting full sync");
            self.context.queue.add_event(SyncEvent::start_next_sync(true));
            return Ok(true);
        };

        let (token, posted) = self.read_log(token).await?;
        metadata.set_change_log_token(Some(&token)).await?;
        info!(repository = %self.context.repository, changes = posted, "Read change log");
        Ok(true)
    }
}
