//! In-memory port implementations shared by the unit tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reposync_core::domain::{
    ChangeToken, CmisError, MappedObject, MappedObjectType, RemoteId,
};
use reposync_core::events::SyncEvent;
use reposync_core::ports::{
    ChangeLogEntry, ChangeLogPage, FileTransmission, IAuthenticationProvider,
    IFileTransmissionStorage, IIgnoredEntitiesStorage, IMetaDataStorage, ISession,
    ISessionFactory, IgnoredEntity, OperationContext, RemoteObject, RepositoryCapabilities,
    SessionParameters,
};

use crate::context::SyncStores;
use crate::events::ISyncEventQueue;

pub fn rid(s: &str) -> RemoteId {
    RemoteId::new(s).unwrap()
}

// ============================================================================
// RecordingQueue
// ============================================================================

/// Queue that only records what is posted; emptiness is set by the test
pub struct RecordingQueue {
    events: Mutex<Vec<SyncEvent>>,
    empty: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            empty: AtomicBool::new(true),
        })
    }

    pub fn set_empty(&self, empty: bool) {
        self.empty.store(empty, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(SyncEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

impl ISyncEventQueue for RecordingQueue {
    fn add_event(&self, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn is_empty(&self) -> bool {
        self.empty.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MockSession
// ============================================================================

struct Entry {
    object: RemoteObject,
    content: Vec<u8>,
}

/// Repository tree held in memory
pub struct MockSession {
    capabilities: RepositoryCapabilities,
    root_id: RemoteId,
    objects: Mutex<HashMap<RemoteId, Entry>>,
    change_log: Mutex<Vec<ChangeLogEntry>>,
    context: Mutex<OperationContext>,
    pub context_sets: AtomicUsize,
    next_id: AtomicUsize,
    fail_next: Mutex<Option<CmisError>>,
}

impl MockSession {
    pub fn new(capabilities: RepositoryCapabilities) -> Arc<Self> {
        let root_id = rid("root");
        let root = RemoteObject {
            id: root_id.clone(),
            parent_id: None,
            name: String::new(),
            object_type: MappedObjectType::Folder,
            change_token: Some(ChangeToken::new("root-1").unwrap()),
            last_modified: None,
            content_length: None,
            content_hash: None,
            ignored: false,
        };
        let mut objects = HashMap::new();
        objects.insert(
            root_id.clone(),
            Entry {
                object: root,
                content: Vec::new(),
            },
        );
        Arc::new(Self {
            capabilities,
            root_id,
            objects: Mutex::new(objects),
            change_log: Mutex::new(Vec::new()),
            context: Mutex::new(OperationContext::default()),
            context_sets: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            fail_next: Mutex::new(None),
        })
    }

    pub fn root_id(&self) -> RemoteId {
        self.root_id.clone()
    }

    /// Make the next remote call fail
    pub fn fail_next(&self, error: CmisError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    fn check_failure(&self) -> Result<(), CmisError> {
        match self.fail_next.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn token(&self) -> ChangeToken {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        ChangeToken::new(format!("t{n}")).unwrap()
    }

    /// Add an object directly (bypassing the change log)
    pub fn insert(
        &self,
        id: &str,
        parent: &RemoteId,
        name: &str,
        object_type: MappedObjectType,
        content: &[u8],
    ) -> RemoteObject {
        let object = RemoteObject {
            id: rid(id),
            parent_id: Some(parent.clone()),
            name: name.to_string(),
            object_type,
            change_token: Some(self.token()),
            last_modified: Some(Utc::now()),
            content_length: (object_type == MappedObjectType::File).then_some(content.len() as u64),
            content_hash: None,
            ignored: false,
        };
        self.objects.lock().unwrap().insert(
            object.id.clone(),
            Entry {
                object: object.clone(),
                content: content.to_vec(),
            },
        );
        object
    }

    /// Update an object in place and bump its change token
    pub fn update(&self, id: &RemoteId, f: impl FnOnce(&mut RemoteObject, &mut Vec<u8>)) {
        let token = self.token();
        let mut objects = self.objects.lock().unwrap();
        if let Some(entry) = objects.get_mut(id) {
            f(&mut entry.object, &mut entry.content);
            entry.object.change_token = Some(token);
        }
    }

    pub fn remove(&self, id: &RemoteId) {
        let mut objects = self.objects.lock().unwrap();
        let mut doomed = vec![id.clone()];
        while let Some(current) = doomed.pop() {
            objects.remove(&current);
            doomed.extend(
                objects
                    .values()
                    .filter(|e| e.object.parent_id.as_ref() == Some(&current))
                    .map(|e| e.object.id.clone()),
            );
        }
    }

    pub fn object(&self, id: &RemoteId) -> Option<RemoteObject> {
        self.objects.lock().unwrap().get(id).map(|e| e.object.clone())
    }

    pub fn content(&self, id: &RemoteId) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(id).map(|e| e.content.clone())
    }

    pub fn find_by_name(&self, name: &str) -> Option<RemoteObject> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .find(|e| e.object.name == name)
            .map(|e| e.object.clone())
    }

    pub fn log_change(&self, entry: ChangeLogEntry) {
        self.change_log.lock().unwrap().push(entry);
    }

    fn new_id(&self) -> RemoteId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        rid(&format!("obj-{n}"))
    }

    fn get(&self, id: &RemoteId) -> Result<RemoteObject, CmisError> {
        self.object(id)
            .ok_or_else(|| CmisError::ObjectNotFound(id.to_string()))
    }
}

#[async_trait]
impl ISession for MockSession {
    fn repository_id(&self) -> &str {
        "mock-repo"
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        self.capabilities
    }

    fn set_default_context(&self, context: OperationContext) {
        self.context_sets.fetch_add(1, Ordering::SeqCst);
        *self.context.lock().unwrap() = context;
    }

    fn default_context(&self) -> OperationContext {
        self.context.lock().unwrap().clone()
    }

    async fn get_root_folder(&self) -> Result<RemoteObject, CmisError> {
        self.check_failure()?;
        self.get(&self.root_id)
    }

    async fn get_object(&self, id: &RemoteId) -> Result<RemoteObject, CmisError> {
        self.check_failure()?;
        self.get(id)
    }

    async fn get_children(&self, folder_id: &RemoteId) -> Result<Vec<RemoteObject>, CmisError> {
        self.check_failure()?;
        let mut children: Vec<RemoteObject> = self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.object.parent_id.as_ref() == Some(folder_id))
            .map(|e| e.object.clone())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn get_content_changes(
        &self,
        token: Option<&ChangeToken>,
        max_items: u32,
    ) -> Result<ChangeLogPage, CmisError> {
        self.check_failure()?;
        let log = self.change_log.lock().unwrap();
        let start = token
            .and_then(|t| t.as_str().parse::<usize>().ok())
            .unwrap_or(0)
            .min(log.len());
        let end = (start + max_items as usize).min(log.len());
        Ok(ChangeLogPage {
            entries: log[start..end].to_vec(),
            latest_token: Some(ChangeToken::new(end.to_string()).unwrap()),
            has_more: end < log.len(),
        })
    }

    async fn latest_change_log_token(&self) -> Result<Option<ChangeToken>, CmisError> {
        self.check_failure()?;
        let len = self.change_log.lock().unwrap().len();
        Ok(Some(ChangeToken::new(len.to_string()).unwrap()))
    }

    async fn get_content(&self, id: &RemoteId) -> Result<Vec<u8>, CmisError> {
        self.check_failure()?;
        self.content(id)
            .ok_or_else(|| CmisError::ObjectNotFound(id.to_string()))
    }

    async fn create_folder(
        &self,
        parent_id: &RemoteId,
        name: &str,
    ) -> Result<RemoteObject, CmisError> {
        self.check_failure()?;
        let id = self.new_id();
        Ok(self.insert(id.as_str(), parent_id, name, MappedObjectType::Folder, &[]))
    }

    async fn create_document(
        &self,
        parent_id: &RemoteId,
        name: &str,
        content: Vec<u8>,
    ) -> Result<RemoteObject, CmisError> {
        self.check_failure()?;
        if self.find_child(parent_id, name).is_some() {
            return Err(CmisError::Constraint(format!("{name} already exists")));
        }
        let id = self.new_id();
        Ok(self.insert(id.as_str(), parent_id, name, MappedObjectType::File, &content))
    }

    async fn set_content(&self, id: &RemoteId, content: Vec<u8>) -> Result<RemoteObject, CmisError> {
        self.check_failure()?;
        self.get(id)?;
        let len = content.len() as u64;
        self.update(id, |object, data| {
            *data = content;
            object.content_length = Some(len);
        });
        self.get(id)
    }

    async fn delete_object(&self, id: &RemoteId) -> Result<(), CmisError> {
        self.check_failure()?;
        self.get(id)?;
        self.remove(id);
        Ok(())
    }

    async fn move_object(
        &self,
        id: &RemoteId,
        _source_folder_id: &RemoteId,
        target_folder_id: &RemoteId,
    ) -> Result<RemoteObject, CmisError> {
        self.check_failure()?;
        self.get(id)?;
        let target = target_folder_id.clone();
        self.update(id, |object, _| object.parent_id = Some(target));
        self.get(id)
    }

    async fn rename_object(&self, id: &RemoteId, new_name: &str) -> Result<RemoteObject, CmisError> {
        self.check_failure()?;
        self.get(id)?;
        let name = new_name.to_string();
        self.update(id, |object, _| object.name = name);
        self.get(id)
    }
}

impl MockSession {
    fn find_child(&self, parent: &RemoteId, name: &str) -> Option<RemoteObject> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .find(|e| e.object.parent_id.as_ref() == Some(parent) && e.object.name == name)
            .map(|e| e.object.clone())
    }
}

// ============================================================================
// MockSessionFactory
// ============================================================================

/// Session factory whose outcome is switched by the test
pub struct MockSessionFactory {
    session: Arc<MockSession>,
    outcome: Mutex<Option<CmisError>>,
    delay: Mutex<Duration>,
    attempts: Mutex<Vec<SessionParameters>>,
}

impl MockSessionFactory {
    pub fn succeeding(session: Arc<MockSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            outcome: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(session: Arc<MockSession>, error: CmisError) -> Arc<Self> {
        let factory = Self::succeeding(session);
        factory.fail_with(Some(error));
        factory
    }

    pub fn fail_with(&self, error: Option<CmisError>) {
        *self.outcome.lock().unwrap() = error;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn attempts(&self) -> Vec<SessionParameters> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl ISessionFactory for MockSessionFactory {
    async fn create_session(
        &self,
        parameters: &SessionParameters,
        _auth_provider: Option<Arc<dyn IAuthenticationProvider>>,
    ) -> Result<Arc<dyn ISession>, CmisError> {
        self.attempts.lock().unwrap().push(parameters.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.outcome.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(self.session.clone() as Arc<dyn ISession>),
        }
    }
}

// ============================================================================
// In-memory storages
// ============================================================================

#[derive(Default)]
pub struct MemoryMetaData {
    objects: Mutex<HashMap<RemoteId, MappedObject>>,
    token: Mutex<Option<ChangeToken>>,
}

impl MemoryMetaData {
    pub fn all(&self) -> Vec<MappedObject> {
        self.objects.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl IMetaDataStorage for MemoryMetaData {
    async fn save_mapped_object(&self, object: &MappedObject) -> anyhow::Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(object.remote_id.clone(), object.clone());
        Ok(())
    }

    async fn get_object_by_remote_id(
        &self,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<MappedObject>> {
        Ok(self.objects.lock().unwrap().get(remote_id).cloned())
    }

    async fn get_children(&self, parent_id: &RemoteId) -> anyhow::Result<Vec<MappedObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.parent_id.as_ref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn get_root(&self) -> anyhow::Result<Option<MappedObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .find(|o| o.is_root())
            .cloned())
    }

    async fn remove_object(&self, remote_id: &RemoteId) -> anyhow::Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let mut doomed = vec![remote_id.clone()];
        while let Some(current) = doomed.pop() {
            objects.remove(&current);
            doomed.extend(
                objects
                    .values()
                    .filter(|o| o.parent_id.as_ref() == Some(&current))
                    .map(|o| o.remote_id.clone()),
            );
        }
        Ok(())
    }

    async fn get_change_log_token(&self) -> anyhow::Result<Option<ChangeToken>> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn set_change_log_token(&self, token: Option<&ChangeToken>) -> anyhow::Result<()> {
        *self.token.lock().unwrap() = token.cloned();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryIgnored {
    entities: Mutex<Vec<IgnoredEntity>>,
}

#[async_trait]
impl IIgnoredEntitiesStorage for MemoryIgnored {
    async fn add(&self, entity: &IgnoredEntity) -> anyhow::Result<()> {
        let mut entities = self.entities.lock().unwrap();
        entities.retain(|e| e.remote_id != entity.remote_id);
        entities.push(entity.clone());
        Ok(())
    }

    async fn remove(&self, remote_id: &RemoteId) -> anyhow::Result<()> {
        self.entities
            .lock()
            .unwrap()
            .retain(|e| &e.remote_id != remote_id);
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<IgnoredEntity>> {
        Ok(self.entities.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemoryTransmissions {
    transmissions: Mutex<HashMap<PathBuf, FileTransmission>>,
}

#[async_trait]
impl IFileTransmissionStorage for MemoryTransmissions {
    async fn save_transmission(&self, transmission: &FileTransmission) -> anyhow::Result<()> {
        self.transmissions
            .lock()
            .unwrap()
            .insert(transmission.path.clone(), transmission.clone());
        Ok(())
    }

    async fn remove_transmission(&self, path: &Path) -> anyhow::Result<()> {
        self.transmissions.lock().unwrap().remove(path);
        Ok(())
    }

    async fn get_transmission(&self, path: &Path) -> anyhow::Result<Option<FileTransmission>> {
        Ok(self.transmissions.lock().unwrap().get(path).cloned())
    }

    async fn list_transmissions(&self) -> anyhow::Result<Vec<FileTransmission>> {
        Ok(self.transmissions.lock().unwrap().values().cloned().collect())
    }
}

/// Storages plus typed handles to inspect them
pub struct MemoryStores {
    pub metadata: Arc<MemoryMetaData>,
    pub ignored: Arc<MemoryIgnored>,
    pub transmissions: Arc<MemoryTransmissions>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self {
            metadata: Arc::new(MemoryMetaData::default()),
            ignored: Arc::new(MemoryIgnored::default()),
            transmissions: Arc::new(MemoryTransmissions::default()),
        }
    }

    pub fn stores(&self) -> SyncStores {
        SyncStores {
            metadata: self.metadata.clone(),
            ignored: self.ignored.clone(),
            transmissions: self.transmissions.clone(),
        }
    }

    /// Persist the root record of `session`
    pub async fn save_root(&self, session: &MockSession) -> MappedObject {
        let root = MappedObject::root(session.root_id(), None);
        self.metadata.save_mapped_object(&root).await.unwrap();
        root
    }
}

/// Wait until `condition` holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
