//! Per-repository composition root
//!
//! [`RepositoryService`] owns everything one configured repository needs:
//! the event queue and manager, the long-lived handlers, the local file
//! watcher and a periodic poll that asks for partial syncs.
//!
//! ## Long-lived handlers
//!
//! | Handler                              | Priority |
//! |--------------------------------------|----------|
//! | `DebugLoggingHandler`                | 100000   |
//! | `StatusReporter`                     | 50000    |
//! | `DelayRetryAndNextSyncEventHandler`  | 9000     |
//! | `EventManagerInitializer`            | 8000     |
//! | `ConnectionScheduler`                | 7000     |
//!
//! The session-dependent handlers are installed by the initializer on
//! every login.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use reposync_core::domain::RepoInfo;
use reposync_core::events::SyncEvent;
use reposync_core::ports::{IAuthenticationProvider, ISessionFactory};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionInterruptedHandler, ConnectionScheduler};
use crate::context::SyncStores;
use crate::delay_retry::DelayRetryAndNextSyncEventHandler;
use crate::events::{DebugLoggingHandler, ISyncEventQueue, SyncEventManager, SyncEventQueue};
use crate::filesystem::LocalFileSystem;
use crate::initializer::EventManagerInitializer;
use crate::lock;
use crate::reporting::{RepositoryStatus, StatusReporter};
use crate::watcher::{LocalWatcher, DEFAULT_DEBOUNCE};

/// Settings shared by all repositories of one process
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Delay between connection attempts; `None` uses the scheduler default
    pub reconnect_interval: Option<Duration>,
    pub user_agent: String,
    /// Watch the local folder for changes
    pub watch_local: bool,
    pub debounce: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: None,
            user_agent: concat!("reposync/", env!("CARGO_PKG_VERSION")).to_string(),
            watch_local: true,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

pub struct RepositoryService {
    repo_info: Arc<Mutex<RepoInfo>>,
    options: ServiceOptions,
    manager: Arc<SyncEventManager>,
    queue: Arc<SyncEventQueue>,
    scheduler: Arc<ConnectionScheduler>,
    initializer: Arc<EventManagerInitializer>,
    reporter: Arc<StatusReporter>,
    _interrupted: ConnectionInterruptedHandler,
    watcher: Mutex<Option<LocalWatcher>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl RepositoryService {
    /// Wire the handler chain; nothing runs until [`start`](Self::start)
    ///
    /// Must be called from within a tokio runtime (the queue spawns its
    /// consumer immediately).
    pub fn new(
        repo_info: RepoInfo,
        factory: Arc<dyn ISessionFactory>,
        auth_provider: Option<Arc<dyn IAuthenticationProvider>>,
        stores: SyncStores,
        options: ServiceOptions,
    ) -> Self {
        let manager = Arc::new(SyncEventManager::new());
        let queue = SyncEventQueue::new(manager.clone());
        let producer: Arc<dyn ISyncEventQueue> = queue.clone();

        let reporter = Arc::new(StatusReporter::new(&repo_info.name));
        let delay_retry = Arc::new(DelayRetryAndNextSyncEventHandler::new(producer.clone()));
        let initializer = Arc::new(EventManagerInitializer::new(
            &manager,
            producer.clone(),
            stores,
            repo_info.clone(),
        ));
        let scheduler = Arc::new(ConnectionScheduler::new(
            producer.clone(),
            factory,
            auth_provider,
            repo_info.clone(),
            options.reconnect_interval,
            options.user_agent.clone(),
        ));
        let interrupted = ConnectionInterruptedHandler::new(&manager, producer);

        manager.add_event_handler(Arc::new(DebugLoggingHandler::new(&repo_info.name)));
        manager.add_event_handler(reporter.clone());
        manager.add_event_handler(delay_retry);
        manager.add_event_handler(initializer.clone());
        manager.add_event_handler(scheduler.clone());

        Self {
            repo_info: Arc::new(Mutex::new(repo_info)),
            options,
            manager,
            queue,
            scheduler,
            initializer,
            reporter,
            _interrupted: interrupted,
            watcher: Mutex::new(None),
            poller: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> String {
        lock(&self.repo_info).name.clone()
    }

    pub fn repo_info(&self) -> RepoInfo {
        lock(&self.repo_info).clone()
    }

    /// Start connecting, polling and watching
    ///
    /// # Errors
    /// Returns an error if the local folder cannot be created
    pub fn start(&self) -> Result<()> {
        let repo_info = self.repo_info();
        std::fs::create_dir_all(&repo_info.local_path).with_context(|| {
            format!("Failed to create local folder {}", repo_info.local_path.display())
        })?;

        info!(repository = %repo_info.name, path = %repo_info.local_path.display(), "Starting repository");
        self.scheduler.start();
        self.start_poller();
        if self.options.watch_local {
            self.restart_watcher(&repo_info);
        }
        Ok(())
    }

    fn start_poller(&self) {
        let mut poller = lock(&self.poller);
        if poller.is_some() {
            return;
        }
        let repo_info = self.repo_info.clone();
        let scheduler = self.scheduler.clone();
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        *poller = Some(tokio::spawn(async move {
            loop {
                let interval = lock(&repo_info).poll_interval();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if scheduler.session().is_some() {
                    debug!("Periodic sync request");
                    queue.add_event(SyncEvent::start_next_sync(false));
                }
            }
        }));
    }

    fn restart_watcher(&self, repo_info: &RepoInfo) {
        let local = LocalFileSystem::new(&repo_info.local_path);
        let queue: Arc<dyn ISyncEventQueue> = self.queue.clone();
        let started = LocalWatcher::start(
            local,
            queue,
            self.options.debounce,
            self.cancel.child_token(),
        );
        let watcher = match started {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(
                    repository = %repo_info.name,
                    error = %e,
                    "Local changes will only be found by periodic crawls"
                );
                None
            }
        };
        *lock(&self.watcher) = watcher;
    }

    /// Apply a new configuration for this repository
    ///
    /// An identical configuration is ignored. Otherwise work running for
    /// the current session is cancelled and `RepoConfigChanged` is posted.
    pub fn update_config(&self, repo_info: RepoInfo) {
        let previous = std::mem::replace(&mut *lock(&self.repo_info), repo_info.clone());
        if previous == repo_info {
            debug!(repository = %repo_info.name, "Configuration unchanged");
            return;
        }
        self.initializer.cancel_current();
        let watching = lock(&self.watcher).is_some();
        if watching && previous.local_path != repo_info.local_path {
            info!(path = %repo_info.local_path.display(), "Local folder changed, restarting watcher");
            self.restart_watcher(&repo_info);
        }
        self.queue.add_event(SyncEvent::RepoConfigChanged { repo_info });
    }

    /// Ask for a sync; full syncs crawl the whole tree
    pub fn request_sync(&self, full: bool) {
        self.queue.add_event(SyncEvent::start_next_sync(full));
    }

    pub fn status(&self) -> watch::Receiver<RepositoryStatus> {
        self.reporter.subscribe()
    }

    pub fn queue(&self) -> &Arc<SyncEventQueue> {
        &self.queue
    }

    pub fn manager(&self) -> &Arc<SyncEventManager> {
        &self.manager
    }

    /// Stop everything; returns false if the queue did not stop in time
    ///
    /// Events still waiting in the queue are discarded.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(repository = %self.name(), "Shutting down repository");
        self.cancel.cancel();
        let watcher = lock(&self.watcher).take();
        if let Some(watcher) = watcher {
            watcher.stop().await;
        }
        let poller = lock(&self.poller).take();
        if let Some(poller) = poller {
            let _ = poller.await;
        }
        self.scheduler.dispose();
        self.initializer.uninstall();
        self.queue.stop_listener();
        self.queue.wait_for_stopped(timeout).await
    }
}

impl Drop for RepositoryService {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.scheduler.dispose();
        self.queue.dispose();
    }
}
