//! Detection of local moves
//!
//! Watchers report a move as a removal followed by a creation. A removal
//! of a synced file is held back while the queue still has work; if a
//! creation with the same content shows up meanwhile, both are replaced by
//! a single local `Moved` event. Held removals that find no partner are
//! released once the queue drains.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use reposync_core::domain::{ContentHash, RemoteId, UniqueId};
use reposync_core::events::{ChangeEvent, ChangeType, ObjectType, SyncEvent};
use tracing::debug;

use crate::context::SessionContext;
use crate::events::{priorities, ISyncEventHandler};
use crate::{lock, SyncError};

struct HeldRemoval {
    event: ChangeEvent,
    remote_id: RemoteId,
    checksum: ContentHash,
}

#[derive(Default)]
struct State {
    held: Vec<HeldRemoval>,
    released: HashSet<UniqueId>,
}

pub struct MoveAccumulator {
    context: SessionContext,
    state: Mutex<State>,
}

impl MoveAccumulator {
    pub fn new(context: SessionContext) -> Self {
        Self {
            context,
            state: Mutex::new(State::default()),
        }
    }

    /// Number of removals waiting for a partner
    pub fn held(&self) -> usize {
        lock(&self.state).held.len()
    }

    async fn try_hold(&self, change: &ChangeEvent, path: &Path) -> Result<bool, SyncError> {
        if self.context.queue.is_empty() {
            return Ok(false);
        }
        let stored = self
            .context
            .stores
            .metadata
            .get_object_by_relative_path(path)
            .await?;
        let Some(stored) = stored.filter(|s| !s.is_folder()) else {
            return Ok(false);
        };
        let Some(checksum) = stored.checksum.clone() else {
            return Ok(false);
        };

        debug!(path = %path.display(), "Holding removal back as possible move source");
        lock(&self.state).held.push(HeldRemoval {
            event: change.clone(),
            remote_id: stored.remote_id,
            checksum,
        });
        Ok(true)
    }

    async fn try_pair(&self, path: &Path) -> Result<bool, SyncError> {
        let nothing_held = lock(&self.state).held.is_empty();
        if nothing_held {
            return Ok(false);
        }
        let checksum = match self.context.local.checksum(path).await {
            Ok(checksum) => checksum,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let partner = {
            let mut state = lock(&self.state);
            let index = state.held.iter().position(|h| h.checksum == checksum);
            index.map(|i| state.held.remove(i))
        };
        let Some(source) = partner else {
            return Ok(false);
        };
        let Some(old_path) = source.event.local_path() else {
            return Ok(false);
        };

        debug!(
            from = %old_path.display(),
            to = %path.display(),
            "Detected local move"
        );
        let moved = ChangeEvent::local(ChangeType::Moved, ObjectType::File, path)
            .with_old_local_path(old_path)
            .with_remote_id(source.remote_id);
        self.context.queue.add_event(moved.into());
        Ok(true)
    }

    /// Put unpaired removals back on the queue once it has drained
    fn release_if_idle(&self) {
        if !self.context.queue.is_empty() {
            return;
        }
        let held = {
            let mut state = lock(&self.state);
            let held = std::mem::take(&mut state.held);
            for removal in &held {
                state.released.insert(removal.event.id());
            }
            held
        };
        for removal in held {
            debug!(event = %removal.event, "Releasing unpaired removal");
            self.context.queue.add_event(removal.event.into());
        }
    }
}

#[async_trait]
impl ISyncEventHandler for MoveAccumulator {
    fn priority(&self) -> i32 {
        priorities::MOVE_ACCUMULATOR
    }

    fn name(&self) -> &str {
        "MoveAccumulator"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let consumed = match event.as_change() {
            Some(change) if change.is_local() && change.object_type() != ObjectType::Folder => {
                match (change.change(), change.local_path()) {
                    (ChangeType::Removed, Some(path)) => {
                        let released = lock(&self.state).released.remove(&change.id());
                        if released {
                            false
                        } else {
                            self.try_hold(change, path).await?
                        }
                    }
                    (ChangeType::Created, Some(path)) => self.try_pair(path).await?,
                    _ => false,
                }
            }
            _ => false,
        };
        self.release_if_idle();
        Ok(consumed)
    }
}
