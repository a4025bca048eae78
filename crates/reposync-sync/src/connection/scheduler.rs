//! Connection scheduler
//!
//! Keeps trying to open a session for one repository until it succeeds,
//! then stays idle until the configuration changes or the session breaks.
//!
//! ## States
//!
//! ```text
//!                 ┌──────── ConnectionException ────────┐
//!                 ▼                                     │
//!          Disconnected ──── attempt succeeds ───→ Connected
//!            │   ▲
//!  permission│   │ deadline reached / RepoConfigChanged
//!     denied ▼   │
//!          Blocked(until)
//! ```
//!
//! Attempts run on the scheduler's own task, never on the queue consumer,
//! so a hanging login does not stall event dispatch. Only one attempt is
//! ever in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposync_core::domain::{CmisError, RepoInfo};
use reposync_core::events::SyncEvent;
use reposync_core::ports::{
    sync_operation_context, IAuthenticationProvider, ISession, ISessionFactory,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::blocked_until::parse_blocked_until;
use crate::events::{priorities, ISyncEventHandler, ISyncEventQueue};
use crate::{lock, SyncError};

/// Interval between attempts when none is configured
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Why the scheduler is not attempting to connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocked {
    No,
    Until(DateTime<Utc>),
    UntilConfigChange,
}

struct State {
    repo_info: RepoInfo,
    session: Option<Arc<dyn ISession>>,
    blocked: Blocked,
    /// Bumped whenever the settings change; results of older attempts are dropped
    generation: u64,
}

/// What the loop does next
enum Wait {
    Idle,
    For(Duration),
    Nothing,
}

/// Result of one attempt
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Connected,
    Blocked,
    Retry,
    Stale,
}

struct Inner {
    queue: Arc<dyn ISyncEventQueue>,
    factory: Arc<dyn ISessionFactory>,
    auth_provider: Option<Arc<dyn IAuthenticationProvider>>,
    user_agent: String,
    interval: Duration,
    state: Mutex<State>,
    wake: Notify,
    cancel: CancellationToken,
}

/// Opens sessions and reports login results as events
pub struct ConnectionScheduler {
    inner: Arc<Inner>,
    started: AtomicBool,
}

impl ConnectionScheduler {
    /// Create a scheduler; nothing happens until [`start`](Self::start)
    ///
    /// `interval` falls back to [`DEFAULT_INTERVAL`] when `None` or zero.
    pub fn new(
        queue: Arc<dyn ISyncEventQueue>,
        factory: Arc<dyn ISessionFactory>,
        auth_provider: Option<Arc<dyn IAuthenticationProvider>>,
        repo_info: RepoInfo,
        interval: Option<Duration>,
        user_agent: impl Into<String>,
    ) -> Self {
        let interval = interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or(DEFAULT_INTERVAL);

        Self {
            inner: Arc::new(Inner {
                queue,
                factory,
                auth_provider,
                user_agent: user_agent.into(),
                interval,
                state: Mutex::new(State {
                    repo_info,
                    session: None,
                    blocked: Blocked::No,
                    generation: 0,
                }),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the connection loop; later calls do nothing
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.cancel.is_cancelled() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run().await });
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// The session opened by the last successful attempt, if still valid
    pub fn session(&self) -> Option<Arc<dyn ISession>> {
        lock(&self.inner.state).session.clone()
    }

    /// Stop attempting and release the session; safe at any time
    pub fn dispose(&self) {
        self.inner.cancel.cancel();
        lock(&self.inner.state).session = None;
    }

    fn config_changed(&self, repo_info: &RepoInfo) {
        {
            let mut state = lock(&self.inner.state);
            if &state.repo_info == repo_info {
                debug!(repository = %repo_info.name, "Configuration unchanged, not reconnecting");
                return;
            }
            state.repo_info = repo_info.clone();
            state.blocked = Blocked::No;
            state.session = None;
            state.generation += 1;
        }
        info!(repository = %repo_info.name, "Configuration changed, reconnecting");
        self.inner.wake.notify_one();
    }

    fn connection_lost(&self, cause: &CmisError) {
        let name = {
            let mut state = lock(&self.inner.state);
            if state.session.take().is_none() {
                return;
            }
            state.blocked = Blocked::No;
            state.repo_info.name.clone()
        };
        warn!(repository = %name, error = %cause, "Connection lost, reconnecting");
        self.inner.wake.notify_one();
    }
}

impl Drop for ConnectionScheduler {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

#[async_trait]
impl ISyncEventHandler for ConnectionScheduler {
    fn priority(&self) -> i32 {
        priorities::CONNECTION_SCHEDULER
    }

    fn name(&self) -> &str {
        "ConnectionScheduler"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        match event {
            SyncEvent::RepoConfigChanged { repo_info } => self.config_changed(repo_info),
            SyncEvent::ConnectionException { cause } => self.connection_lost(cause),
            _ => {}
        }
        Ok(false)
    }
}

// ============================================================================
// Connection loop
// ============================================================================

impl Inner {
    async fn run(self: Arc<Self>) {
        debug!(interval_ms = self.interval.as_millis() as u64, "Connection loop started");

        while !self.cancel.is_cancelled() {
            match self.next_wait() {
                Wait::Idle => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.wake.notified() => continue,
                    }
                }
                Wait::For(delay) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.wake.notified() => continue,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
                Wait::Nothing => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = self.attempt() => outcome,
            };

            if outcome == Outcome::Retry {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        lock(&self.state).session = None;
        debug!("Connection loop stopped");
    }

    fn next_wait(&self) -> Wait {
        let mut state = lock(&self.state);
        if state.session.is_some() {
            return Wait::Idle;
        }
        match state.blocked {
            Blocked::No => Wait::Nothing,
            Blocked::UntilConfigChange => Wait::Idle,
            Blocked::Until(deadline) => match (deadline - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => Wait::For(remaining),
                _ => {
                    state.blocked = Blocked::No;
                    Wait::Nothing
                }
            },
        }
    }

    async fn attempt(&self) -> Outcome {
        let (parameters, generation, name) = {
            let state = lock(&self.state);
            (
                state.repo_info.session_parameters(&self.user_agent),
                state.generation,
                state.repo_info.name.clone(),
            )
        };

        debug!(repository = %name, "Connecting");
        let result = self
            .factory
            .create_session(&parameters, self.auth_provider.clone())
            .await;

        let current = lock(&self.state).generation;
        if current != generation {
            debug!(repository = %name, "Discarding attempt made with outdated settings");
            return Outcome::Stale;
        }

        match result {
            Ok(session) => {
                session.set_default_context(sync_operation_context());
                {
                    let mut state = lock(&self.state);
                    state.session = Some(session.clone());
                    state.blocked = Blocked::No;
                }
                info!(repository = %name, remote = session.repository_id(), "Connected");
                self.queue.add_event(SyncEvent::SuccessfulLogin { session });
                Outcome::Connected
            }
            Err(CmisError::PermissionDenied {
                message,
                retry_hint,
            }) => {
                let now = Utc::now();
                let until = retry_hint
                    .as_deref()
                    .and_then(|hint| parse_blocked_until(hint, now));
                let blocked = match until {
                    Some(deadline) if deadline > now => Blocked::Until(deadline),
                    Some(_) => Blocked::No,
                    None => Blocked::UntilConfigChange,
                };
                lock(&self.state).blocked = blocked;

                warn!(
                    repository = %name,
                    blocked_until = ?until,
                    "Permission denied: {message}"
                );
                self.queue.add_event(SyncEvent::PermissionDenied {
                    blocked_until: until,
                    message,
                });
                match blocked {
                    Blocked::No => Outcome::Retry,
                    _ => Outcome::Blocked,
                }
            }
            Err(CmisError::ProxyAuthRequired(message)) => {
                warn!(repository = %name, "Proxy authentication required: {message}");
                self.queue
                    .add_event(SyncEvent::ProxyAuthRequired { message });
                Outcome::Retry
            }
            Err(error) => {
                warn!(repository = %name, error = %error, "Connection attempt failed");
                self.queue.add_event(SyncEvent::Exception {
                    message: error.to_string(),
                });
                Outcome::Retry
            }
        }
    }
}
