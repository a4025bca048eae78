//! Local change detection
//!
//! Wraps the `notify` crate to monitor a repository's local folder and
//! turns raw OS notifications into local [`ChangeEvent`]s on the sync
//! event queue.
//!
//! ## Architecture
//!
//! ```text
//! inotify / fanotify
//!       │
//!       ▼
//!  notify callback ──→ mpsc::channel ──→ DebouncedChanges ──→ ISyncEventQueue
//! ```
//!
//! Bursts of notifications for the same path are coalesced; only the last
//! one is turned into an event once the path has been quiet for the
//! debounce window. Temporary files and conflict copies are never reported.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use reposync_core::events::{ChangeEvent, ChangeType, ObjectType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::ISyncEventQueue;
use crate::filesystem::{is_temporary_name, LocalFileSystem};

/// Quiet period before a path's change is reported
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

const CHANNEL_CAPACITY: usize = 1024;

/// A filesystem notification reduced to what the sync cares about
#[derive(Debug, Clone, PartialEq, Eq)]
enum FsChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { old: PathBuf, new: PathBuf },
}

impl FsChange {
    /// Path the change is keyed by; the destination for renames
    fn path(&self) -> &Path {
        match self {
            FsChange::Created(p) | FsChange::Modified(p) | FsChange::Removed(p) => p,
            FsChange::Renamed { new, .. } => new,
        }
    }
}

// ============================================================================
// LocalWatcher
// ============================================================================

/// Watches a local root and posts local change events
///
/// Watching stops when the watcher is dropped or [`stop`](Self::stop) is
/// called.
pub struct LocalWatcher {
    _watcher: RecommendedWatcher,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl LocalWatcher {
    /// Start watching `local`'s root recursively
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or the root
    /// cannot be watched (missing folder, inotify limit reached)
    pub fn start(
        local: LocalFileSystem,
        queue: Arc<dyn ISyncEventQueue>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<FsChange>(CHANNEL_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if let Err(e) = tx.blocking_send(change) {
                            warn!(error = %e, "Dropping file change (watcher stopped)");
                        }
                    }
                }
                Err(err) => error!(error = %err, "File watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(local.root(), RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", local.root().display()))?;
        info!(path = %local.root().display(), debounce_ms = debounce.as_millis() as u64, "Watching local folder");

        let task = tokio::spawn(run(local, queue, rx, debounce, cancel.clone()));
        Ok(Self {
            _watcher: watcher,
            task: Some(task),
            cancel,
        })
    }

    /// Stop watching and wait for the forwarding task to finish
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LocalWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    local: LocalFileSystem,
    queue: Arc<dyn ISyncEventQueue>,
    mut rx: mpsc::Receiver<FsChange>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    let mut pending = DebouncedChanges::new(debounce);
    let mut tick = tokio::time::interval((debounce / 2).max(Duration::from_millis(10)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(change) => pending.push(change),
                None => break,
            },
            _ = tick.tick() => {
                for change in pending.poll() {
                    for event in to_events(&local, change).await {
                        debug!(event = %event, "Local change detected");
                        queue.add_event(event.into());
                    }
                }
            }
        }
    }
    debug!("File watcher stopped");
}

// ============================================================================
// Event mapping - notify::Event → FsChange → ChangeEvent
// ============================================================================

/// Converts a `notify::Event` into an [`FsChange`]
///
/// - `Create(*)` -> `Created`
/// - `Modify(Name(Both))` with 2 paths -> `Renamed`
/// - `Modify(Name(From))` -> `Removed`, `Modify(Name(To))` -> `Created`
/// - `Remove(*)` -> `Removed`
/// - Other `Modify(*)` -> `Modified`
///
/// Access events and events without paths are dropped.
fn map_notify_event(event: &notify::Event) -> Option<FsChange> {
    let paths = &event.paths;
    let first = || paths.first().cloned();

    match &event.kind {
        EventKind::Create(_) => first().map(FsChange::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.as_slice() {
            [old, new, ..] => Some(FsChange::Renamed {
                old: old.clone(),
                new: new.clone(),
            }),
            _ => first().map(FsChange::Modified),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => first().map(FsChange::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => first().map(FsChange::Created),
        EventKind::Remove(_) => first().map(FsChange::Removed),
        EventKind::Modify(_) => first().map(FsChange::Modified),
        _ => None,
    }
}

fn is_temporary(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| is_temporary_name(&name.to_string_lossy()))
}

/// Relative path inside the root, unless the entry is to be ignored
fn relevant(local: &LocalFileSystem, absolute: &Path) -> Option<PathBuf> {
    if is_temporary(absolute) {
        return None;
    }
    local
        .relative(absolute)
        .filter(|relative| !relative.as_os_str().is_empty())
}

async fn object_type(local: &LocalFileSystem, relative: &Path) -> Option<ObjectType> {
    match local.stat(relative).await {
        Ok(Some(entry)) if entry.is_dir => Some(ObjectType::Folder),
        Ok(Some(_)) => Some(ObjectType::File),
        Ok(None) => None,
        Err(e) => {
            warn!(path = %relative.display(), error = %e, "Cannot stat changed entry");
            None
        }
    }
}

/// Turn a settled filesystem change into local change events
async fn to_events(local: &LocalFileSystem, change: FsChange) -> Vec<ChangeEvent> {
    match change {
        FsChange::Created(path) => {
            let Some(relative) = relevant(local, &path) else {
                return Vec::new();
            };
            match object_type(local, &relative).await {
                Some(kind) => vec![ChangeEvent::local(ChangeType::Created, kind, relative)],
                None => Vec::new(),
            }
        }
        FsChange::Modified(path) => {
            let Some(relative) = relevant(local, &path) else {
                return Vec::new();
            };
            // folder mtimes change with their children; those are reported on their own
            match object_type(local, &relative).await {
                Some(ObjectType::File) => {
                    vec![ChangeEvent::local(ChangeType::Changed, ObjectType::File, relative)]
                }
                _ => Vec::new(),
            }
        }
        FsChange::Removed(path) => match relevant(local, &path) {
            Some(relative) => vec![ChangeEvent::local(
                ChangeType::Removed,
                ObjectType::Unknown,
                relative,
            )],
            None => Vec::new(),
        },
        FsChange::Renamed { old, new } => {
            let old_relative = relevant(local, &old);
            let Some(new_relative) = relevant(local, &new) else {
                return old_relative
                    .map(|old| ChangeEvent::local(ChangeType::Removed, ObjectType::Unknown, old))
                    .into_iter()
                    .collect();
            };
            let Some(kind) = object_type(local, &new_relative).await else {
                return Vec::new();
            };
            match old_relative {
                Some(old) => vec![ChangeEvent::local(ChangeType::Moved, kind, new_relative)
                    .with_old_local_path(old)],
                None => vec![ChangeEvent::local(ChangeType::Created, kind, new_relative)],
            }
        }
    }
}

// ============================================================================
// DebouncedChanges
// ============================================================================

/// Coalesces rapid filesystem changes per path
///
/// A newer change for a path replaces the pending one and restarts its
/// quiet period, so an editor's intermediate saves collapse into one event.
struct DebouncedChanges {
    pending: HashMap<PathBuf, (FsChange, Instant)>,
    debounce: Duration,
}

impl DebouncedChanges {
    fn new(debounce: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce,
        }
    }

    fn push(&mut self, change: FsChange) {
        if let FsChange::Renamed { old, .. } = &change {
            self.pending.remove(old);
        }
        let path = change.path().to_path_buf();
        self.pending.insert(path, (change, Instant::now()));
    }

    /// Remove and return every change that has been quiet long enough
    fn poll(&mut self) -> Vec<FsChange> {
        let now = Instant::now();
        let settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= self.debounce)
            .map(|(path, _)| path.clone())
            .collect();

        let mut changes: Vec<FsChange> = settled
            .iter()
            .filter_map(|path| self.pending.remove(path).map(|(change, _)| change))
            .collect();
        // parents before children
        changes.sort_by(|a, b| a.path().components().count().cmp(&b.path().components().count()));
        changes
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}
