//! Full tree comparison
//!
//! On every `StartNextSync` that reaches it, the crawler walks the remote
//! tree, the local tree and the stored mapping side by side and posts a
//! change event for every difference. Folders are visited breadth-first,
//! so a parent's event is always posted before its children's.
//!
//! | Remote            | Stored               | Local              | Event                 |
//! |-------------------|----------------------|--------------------|-----------------------|
//! | present           | missing              | -                  | remote Created        |
//! | present elsewhere | present              | -                  | remote Moved          |
//! | token differs     | present              | -                  | remote Changed        |
//! | missing           | present              | -                  | remote Removed        |
//! | unchanged         | present              | missing            | local Removed         |
//! | unchanged         | present (file)       | size/mtime differs | local Changed         |
//! | missing           | missing              | present            | local Created         |

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reposync_core::domain::{MappedObject, RemoteId};
use reposync_core::events::{ChangeEvent, ChangeType, ObjectType, SyncEvent};
use reposync_core::ports::{IgnoredEntity, RemoteObject};
use tracing::{debug, info};

use crate::context::SessionContext;
use crate::events::{priorities, ISyncEventHandler};
use crate::filesystem::LocalEntry;
use crate::SyncError;

/// Returns true if the local copy differs from what was last synced
pub(crate) fn locally_modified(stored: &MappedObject, local: &LocalEntry) -> bool {
    if stored.is_folder() || local.is_dir {
        return false;
    }
    if stored.content_size.is_some_and(|size| size != local.size) {
        return true;
    }
    match (stored.last_local_write, local.modified) {
        (Some(synced), Some(modified)) => modified > synced,
        (None, _) => true,
        (Some(_), None) => false,
    }
}

fn object_type(is_folder: bool) -> ObjectType {
    if is_folder {
        ObjectType::Folder
    } else {
        ObjectType::File
    }
}

/// Folder waiting to be compared
struct Pending {
    remote_id: RemoteId,
    path: PathBuf,
}

pub struct DescendantsCrawler {
    context: SessionContext,
}

impl DescendantsCrawler {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    async fn crawl(&self) -> Result<usize, SyncError> {
        let ctx = &self.context;
        let metadata = &ctx.stores.metadata;
        let root = metadata
            .get_root()
            .await?
            .ok_or_else(|| SyncError::InvalidState("root folder is not mapped".into()))?;
        let ignored = ctx.stores.ignored.list().await?;

        let mut events = Vec::new();
        let mut seen: HashSet<RemoteId> = HashSet::new();
        let mut removal_candidates: Vec<(MappedObject, PathBuf)> = Vec::new();
        let mut local_only: Vec<PathBuf> = Vec::new();

        seen.insert(root.remote_id.clone());
        let mut folders = VecDeque::from([Pending {
            remote_id: root.remote_id.clone(),
            path: PathBuf::new(),
        }]);

        while let Some(folder) = folders.pop_front() {
            ctx.check_cancelled()?;

            let remote_children = ctx.session.get_children(&folder.remote_id).await?;
            let stored_children = metadata.get_children(&folder.remote_id).await?;
            let local_children = ctx.local.list_dir(&folder.path).await?;
            let mut claimed_names: HashSet<String> = HashSet::new();

            for remote in &remote_children {
                seen.insert(remote.id.clone());
                let path = folder.path.join(&remote.name);
                claimed_names.insert(remote.name.clone());

                let stored = match stored_children.iter().find(|s| s.remote_id == remote.id) {
                    Some(stored) => Some(stored.clone()),
                    None => metadata.get_object_by_remote_id(&remote.id).await?,
                };
                let local = local_children
                    .iter()
                    .find(|(name, _)| name == &remote.name)
                    .map(|(_, entry)| entry);

                let descend = self
                    .compare(remote, stored.as_ref(), local, &folder, &path, &mut events)
                    .await?;
                if let Some(stored) = &stored {
                    claimed_names.insert(stored.name.clone());
                }

                if descend && remote.is_folder() && !is_ignored(&ignored, &remote.id, &path) {
                    folders.push_back(Pending {
                        remote_id: remote.id.clone(),
                        path,
                    });
                }
            }

            for stored in stored_children
                .iter()
                .filter(|s| !remote_children.iter().any(|r| r.id == s.remote_id))
            {
                claimed_names.insert(stored.name.clone());
                removal_candidates.push((stored.clone(), folder.path.join(&stored.name)));
            }

            for (name, entry) in &local_children {
                if claimed_names.contains(name) {
                    continue;
                }
                let path = folder.path.join(name);
                if ignored.iter().any(|e| path.starts_with(&e.local_path)) {
                    continue;
                }
                events.push(ChangeEvent::local(
                    ChangeType::Created,
                    object_type(entry.is_dir),
                    path.clone(),
                ));
                if entry.is_dir {
                    local_only.push(path);
                }
            }
        }

        for (stored, path) in removal_candidates {
            if !seen.contains(&stored.remote_id) {
                events.push(
                    ChangeEvent::remote(
                        ChangeType::Removed,
                        object_type(stored.is_folder()),
                        stored.remote_id.clone(),
                    )
                    .with_local_path(path),
                );
            }
        }

        self.collect_local_only(local_only, &mut events).await?;

        let count = events.len();
        for event in events {
            ctx.queue.add_event(event.into());
        }
        Ok(count)
    }

    /// Emit the event for one remote child; returns whether to descend
    async fn compare(
        &self,
        remote: &RemoteObject,
        stored: Option<&MappedObject>,
        local: Option<&LocalEntry>,
        folder: &Pending,
        path: &Path,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<bool, SyncError> {
        let remote_event = |change| {
            ChangeEvent::remote(change, ObjectType::Unknown, remote.id.clone())
                .with_remote_object(remote.clone())
                .with_local_path(path)
        };

        let Some(stored) = stored else {
            events.push(remote_event(ChangeType::Created));
            return Ok(true);
        };

        if stored.parent_id.as_ref() != Some(&folder.remote_id) || stored.name != remote.name {
            let old_path = self.context.stores.metadata.get_relative_path(stored).await?;
            let mut event = remote_event(ChangeType::Moved);
            if let Some(old_path) = old_path {
                event = event.with_old_local_path(old_path);
            }
            events.push(event);
            return Ok(true);
        }

        if stored.change_token != remote.change_token {
            events.push(remote_event(ChangeType::Changed));
            return Ok(true);
        }

        match local {
            None => {
                events.push(
                    ChangeEvent::local(ChangeType::Removed, object_type(stored.is_folder()), path)
                        .with_remote_id(stored.remote_id.clone()),
                );
                Ok(false)
            }
            Some(entry) if locally_modified(stored, entry) => {
                events.push(
                    ChangeEvent::local(ChangeType::Changed, ObjectType::File, path)
                        .with_remote_id(stored.remote_id.clone()),
                );
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    /// Local Created events for everything below new local folders
    async fn collect_local_only(
        &self,
        mut pending: Vec<PathBuf>,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<(), SyncError> {
        let mut index = 0;
        while index < pending.len() {
            self.context.check_cancelled()?;
            let folder = pending[index].clone();
            for (name, entry) in self.context.local.list_dir(&folder).await? {
                let path = folder.join(name);
                events.push(ChangeEvent::local(
                    ChangeType::Created,
                    object_type(entry.is_dir),
                    path.clone(),
                ));
                if entry.is_dir {
                    pending.push(path);
                }
            }
            index += 1;
        }
        Ok(())
    }
}

fn is_ignored(ignored: &[IgnoredEntity], remote_id: &RemoteId, path: &Path) -> bool {
    ignored
        .iter()
        .any(|e| &e.remote_id == remote_id || path.starts_with(&e.local_path))
}

#[async_trait]
impl ISyncEventHandler for DescendantsCrawler {
    fn priority(&self) -> i32 {
        priorities::CRAWLER
    }

    fn name(&self) -> &str {
        "DescendantsCrawler"
    }

    async fn handle(&self, event: &SyncEvent) -> Result<bool, SyncError> {
        let SyncEvent::StartNextSync {
            full_sync_requested,
        } = event
        else {
            return Ok(false);
        };

        debug!(repository = %self.context.repository, full = full_sync_requested, "Crawling");
        let count = self.crawl().await?;
        info!(repository = %self.context.repository, changes = count, "Crawl finished");
        Ok(true)
    }
}
