//! Per-session handler installation
//!
//! Every `SuccessfulLogin` carries a fresh session whose capabilities may
//! differ from the previous one, so the handler set built for the old
//! session is removed and a new one is installed:
//!
//! | Set              | Handlers                                              | When                     |
//! |------------------|-------------------------------------------------------|--------------------------|
//! | baseline         | crawler, remote object fetcher, mechanism, move accumulator | always             |
//! | change log       | content changes                                       | `change_log` capability  |
//! | selective ignore | ignore transformer, ignore filter                     | `selective_ignore` capability |
//!
//! The installed set shares one cancellation token. Replacing the set
//! cancels it, and so does [`EventManagerInitializer::cancel_current`],
//! which producers call when the configuration changes so a crawl of the
//! old session stops between steps instead of holding up the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use reposync_core::domain::{MappedObject, RepoInfo};
use reposync_core::events::SyncEvent;
use reposync_core::ports::ISession;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::content_changes::ContentChanges;
use crate::context::{SessionContext, SyncStores};
use crate::crawler::DescendantsCrawler;
use crate::events::{priorities, ISyncEventHandler, ISyncEventQueue, SyncEventManager};
use crate::fetcher::RemoteObjectFetcher;
use crate::filesystem::LocalFileSystem;
use crate::mechanism::SyncMechanism;
use crate::move_accumulator::MoveAccumulator;
use crate::selective_ignore::{SelectiveIgnoreEventTransformer, SelectiveIgnoreFilter};
use crate::{lock, SyncError};

/// Handlers installed for the current session
#[derive(Default)]
struct InstalledSet {
    handlers: Vec<Arc<dyn ISyncEventHandler>>,
    cancel: Option<CancellationToken>,
}

/// Rebuilds the session-dependent part of the handler chain on login
pub struct EventManagerInitializer {
    manager: Weak<SyncEventManager>,
    queue: Arc<dyn ISyncEventQueue>,
    stores: SyncStores,
    repo_info: Mutex<RepoInfo>,
    installed: Mutex<InstalledSet>,
    root_saved: AtomicBool,
}

impl EventManagerInitializer {
    pub fn new(
        manager: &Arc<SyncEventManager>,
        queue: Arc<dyn ISyncEventQueue>,
        stores: SyncStores,
        repo_info: RepoInfo,
    ) -> Self {
        Self {
            manager: Arc::downgrade(manager),
            queue,
            stores,
            repo_info: Mutex::new(repo_info),
            installed: Mutex::new(InstalledSet::default()),
            root_saved: AtomicBool::new(false),
        }
    }

    /// Names of the handlers installed for the current session
    pub fn installed_handlers(&self) -> Vec<String> {
        lock(&self.installed)
            .handlers
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    /// Stop the work of the current set without removing it
    ///
    /// Safe to call from any thread. The handlers stay registered and fail
    /// with `SyncError::Cancelled` until the next login replaces them.
    pub fn cancel_current(&self) {
        if let Some(cancel) = &lock(&self.installed).cancel {
            if !cancel.is_cancelled() {
                debug!("Cancelling work of the current session");
                cancel.cancel();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn current_token(&self) -> Option<CancellationToken> {
        lock(&self.installed).cancel.clone()
    }

    /// Remove the current set, if any, and stop its work
    pub fn uninstall(&self) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let previous = std::mem::take(&mut *lock(&self.installed));
        if let Some(cancel) = previous.cancel {
            cancel.cancel();
        }
        for handler in &previous.handlers {
            manager.remove_event_handler(handler);
        }
    }

    async fn save_root(&self, session: &Arc<dyn ISession>) -> Result<(), SyncError> {
        let remote_root = session.get_root_folder().await?;
        let metadata = &self.stores.metadata;

        let mut root = MappedObject::root(remote_root.id.clone(), remote_root.change_token.clone());
        match metadata.get_root().await? {
            Some(existing) if existing.remote_id == remote_root.id => root.id = existing.id,
            Some(existing) => {
                info!(
                    old = %existing.remote_id,
                    new = %remote_root.id,
                    "Repository root changed, dropping stored mapping"
                );
                metadata.remove_object(&existing.remote_id).await?;
                metadata.set_change_log_token(None).await?;
            }
            None => {}
        }
        root.last_remote_write = remote_root.last_modified;
        metadata.save_mapped_object(&root).await?;
        debug!(root = %root.remote_id, "Saved root folder");
        Ok(())
    }

    fn build_set(
        &self,
        session: &Arc<dyn ISession>,
        cancel: &CancellationToken,
    ) -> Vec<Arc<dyn ISyncEventHandler>> {
        let repo_info = lock(&self.repo_info).clone();
        let context = SessionContext {
            repository: repo_info.name.clone(),
            session: session.clone(),
            queue: self.queue.clone(),
            stores: self.stores.clone(),
            local: LocalFileSystem::new(&repo_info.local_path),
            max_retries: repo_info.max_retries,
            cancel: cancel.clone(),
        };
        let capabilities = session.capabilities();

        let mut handlers: Vec<Arc<dyn ISyncEventHandler>> = vec![
            Arc::new(DescendantsCrawler::new(context.clone())),
            Arc::new(RemoteObjectFetcher::new(context.clone())),
            Arc::new(SyncMechanism::new(context.clone())),
            Arc::new(MoveAccumulator::new(context.clone())),
        ];
        if capabilities.change_log {
            handlers.push(Arc::new(ContentChanges::new(context.clone())));
        }
        if capabilities.selective_ignore {
            handlers.push(Arc::new(SelectiveIgnoreEventTransformer::new(context.clone())));
            handlers.push(Arc::new(SelectiveIgnoreFilter::new(context)));
        }
        handlers
    }

    async fn on_login(&self, session: &Arc<dyn ISession>) -> Result<(), SyncError> {
        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| SyncError::InvalidState("event manager is gone".into()))?;

        if !self.root_saved.load(Ordering::SeqCst) {
            self.save_root(session).await?;
            self.root_saved.store(true, Ordering::SeqCst);
        }

        self.uninstall();

        let cancel = CancellationToken::new();
        let handlers = self.build_set(session, &cancel);
        for handler in &handlers {
            manager.add_event_handler(handler.clone());
        }
        let capabilities = session.capabilities();
        info!(
            handlers = handlers.len(),
            change_log = capabilities.change_log,
            selective_ignore = capabilities.selective_ignore,
            "Installed session handlers"
        );
        *lock(&self.installed) = InstalledSet {
            handlers,
            cancel: Some(cancel),
        };

        self.queue.add_event(SyncEvent::start_next_sync(true));
        Ok(())
    }
}

impl Drop for EventManagerInitializer {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.installed).cancel.take() {
            cancel.cancel();
        }
    }
}

#[async_trait]
impl ISyncEventHandler for EventManagerInitializer {
    fn priority(&self) -> i32 {
        priorities::INITIALIZER
    }

    fn name(&self) -> &str {
        "EventManagerInitializer"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        match event {
            SyncEvent::SuccessfulLogin { session } => {
                self.on_login(session).await?;
                Ok(true)
            }
            SyncEvent::RepoConfigChanged { repo_info } => {
                *lock(&self.repo_info) = repo_info.clone();
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}
