//! Per-repository services and configuration reloads
//!
//! The daemon owns one [`RepositoryService`] and one state database per
//! configured repository. A reload diffs the repository lists by name:
//! removed repositories are shut down, new ones are opened, and changed
//! ones receive their new [`RepoInfo`] as a `RepoConfigChanged` event.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reposync_cache::{
    DatabasePool, SqliteCookieStorage, SqliteFileTransmissionStorage,
    SqliteIgnoredEntitiesStorage, SqliteMetaDataStorage,
};
use reposync_core::config::Config;
use reposync_core::domain::RepoInfo;
use reposync_core::ports::ISessionFactory;
use reposync_sync::context::SyncStores;
use reposync_sync::reporting::{ConnectionState, RepositoryStatus};
use reposync_sync::repository::{RepositoryService, ServiceOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct RepositoryHandle {
    service: RepositoryService,
    pool: DatabasePool,
    status_logger: JoinHandle<()>,
}

/// What a reload has to do
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReloadPlan {
    pub added: Vec<RepoInfo>,
    pub removed: Vec<String>,
    pub changed: Vec<RepoInfo>,
}

/// Diff two repository lists by display name
pub(crate) fn plan_reload(current: &[RepoInfo], next: &[RepoInfo]) -> ReloadPlan {
    let mut plan = ReloadPlan::default();
    for repo in next {
        match current.iter().find(|old| old.name == repo.name) {
            None => plan.added.push(repo.clone()),
            Some(old) if old != repo => plan.changed.push(repo.clone()),
            Some(_) => {}
        }
    }
    for old in current {
        if !next.iter().any(|repo| repo.name == old.name) {
            plan.removed.push(old.name.clone());
        }
    }
    plan
}

pub struct Daemon {
    config_path: PathBuf,
    config: Config,
    factory: Arc<dyn ISessionFactory>,
    repositories: HashMap<String, RepositoryHandle>,
}

impl Daemon {
    pub fn new(config_path: PathBuf, config: Config, factory: Arc<dyn ISessionFactory>) -> Self {
        Self {
            config_path,
            config,
            factory,
            repositories: HashMap::new(),
        }
    }

    /// Names of the running repositories, sorted
    pub fn repository_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repositories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&self, name: &str) -> Option<RepositoryStatus> {
        self.repositories
            .get(name)
            .map(|handle| handle.service.status().borrow().clone())
    }

    /// Open every configured repository
    ///
    /// A repository that fails to open is logged and skipped.
    pub async fn start(&mut self) -> Result<()> {
        for repo in self.config.repositories.clone() {
            if let Err(e) = self.open(repo.clone()).await {
                error!(repository = %repo.name, error = %format!("{e:#}"), "Failed to start repository");
            }
        }
        info!(count = self.repositories.len(), "Repositories started");
        Ok(())
    }

    fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            reconnect_interval: Some(Duration::from_secs(
                self.config.connection.reconnect_interval_secs,
            )),
            user_agent: self.config.connection.user_agent.clone(),
            ..ServiceOptions::default()
        }
    }

    async fn open(&mut self, repo: RepoInfo) -> Result<()> {
        let db_path = self.config.database_path(&repo);
        let pool = DatabasePool::new(&db_path)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        let stores = SyncStores {
            metadata: Arc::new(SqliteMetaDataStorage::new(pool.pool().clone())),
            ignored: Arc::new(SqliteIgnoredEntitiesStorage::new(pool.pool().clone())),
            transmissions: Arc::new(SqliteFileTransmissionStorage::new(pool.pool().clone())),
        };
        let cookies = Arc::new(SqliteCookieStorage::new(pool.pool().clone()));

        let name = repo.name.clone();
        let service = RepositoryService::new(
            repo,
            self.factory.clone(),
            Some(cookies),
            stores,
            self.service_options(),
        );
        service.start()?;
        let status_logger = tokio::spawn(log_status_changes(name.clone(), service.status()));

        info!(repository = %name, database = %db_path.display(), "Repository started");
        self.repositories.insert(
            name,
            RepositoryHandle {
                service,
                pool,
                status_logger,
            },
        );
        Ok(())
    }

    async fn close(name: &str, handle: RepositoryHandle, timeout: Duration) {
        if !handle.service.shutdown(timeout).await {
            warn!(repository = %name, "Event queue did not stop in time");
        }
        handle.status_logger.abort();
        handle.pool.close().await;
        info!(repository = %name, "Repository stopped");
    }

    /// Re-read the configuration file and apply the differences
    ///
    /// An unreadable or invalid file leaves everything running as is.
    pub async fn reload(&mut self, timeout: Duration) -> Result<()> {
        let next = Config::load(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;
        let errors = next.validate();
        if !errors.is_empty() {
            for e in &errors {
                warn!(field = %e.field, "{}", e.message);
            }
            anyhow::bail!("Configuration has {} error(s), keeping the current one", errors.len());
        }

        let plan = plan_reload(&self.config.repositories, &next.repositories);
        info!(
            added = plan.added.len(),
            removed = plan.removed.len(),
            changed = plan.changed.len(),
            "Reloading configuration"
        );
        self.config = next;

        for name in plan.removed {
            if let Some(handle) = self.repositories.remove(&name) {
                Self::close(&name, handle, timeout).await;
            }
        }
        let mut to_open = plan.added;
        for repo in plan.changed {
            match self.repositories.get(&repo.name) {
                Some(handle) => handle.service.update_config(repo),
                // Failed to open earlier; the new settings may work
                None => to_open.push(repo),
            }
        }
        for repo in to_open {
            let name = repo.name.clone();
            if let Err(e) = self.open(repo).await {
                error!(repository = %name, error = %format!("{e:#}"), "Failed to start repository");
            }
        }
        Ok(())
    }

    /// Stop every repository; waits up to `timeout` per queue
    pub async fn shutdown(mut self, timeout: Duration) {
        for (name, handle) in self.repositories.drain() {
            Self::close(&name, handle, timeout).await;
        }
    }
}

async fn log_status_changes(name: String, mut status: watch::Receiver<RepositoryStatus>) {
    let mut last = status.borrow().connection;
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().connection;
        if current == last {
            continue;
        }
        match current {
            ConnectionState::Connected => info!(repository = %name, "Connected"),
            ConnectionState::Disconnected => warn!(repository = %name, "Disconnected"),
            ConnectionState::Blocked { until: Some(until) } => {
                warn!(repository = %name, %until, "Credentials rejected, blocked")
            }
            ConnectionState::Blocked { until: None } => {
                warn!(repository = %name, "Credentials rejected, blocked until the configuration changes")
            }
            ConnectionState::ProxyAuthRequired => {
                warn!(repository = %name, "Proxy authentication required")
            }
        }
        last = current;
    }
}
