//! [`ISession`] over the CMIS browser binding
//!
//! Reads are `GET` requests carrying a `cmisselector`; writes are form or
//! multipart `POST`s carrying a `cmisaction`. Object-level calls go to the
//! root folder URL with an `objectId` parameter, repository-level calls
//! (content changes, type definitions) to the repository URL.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use reposync_core::domain::{ChangeToken, CmisError, RemoteId};
use reposync_core::ports::{
    ChangeLogPage, ISession, OperationContext, RemoteObject, RepositoryCapabilities,
};
use reqwest::multipart::{Form, Part};
use tracing::{debug, instrument};

use crate::client::{CmisClient, Params};
use crate::model::{ChildrenList, ContentChanges, ObjectData, ObjectParent, RepositoryInfos};

/// Type whose presence marks selective-ignore support
pub const SELECTIVE_IGNORE_TYPE: &str = "gds:sync";

pub struct CmisSession {
    client: Arc<CmisClient>,
    repository_id: String,
    root_folder_id: RemoteId,
    repository_url: String,
    root_folder_url: String,
    capabilities: RepositoryCapabilities,
    context: Mutex<OperationContext>,
}

impl CmisSession {
    pub(crate) fn new(
        client: Arc<CmisClient>,
        repository_id: String,
        root_folder_id: RemoteId,
        repository_url: String,
        root_folder_url: String,
        capabilities: RepositoryCapabilities,
    ) -> Self {
        Self {
            client,
            repository_id,
            root_folder_id,
            repository_url,
            root_folder_url,
            capabilities,
            context: Mutex::new(OperationContext::default()),
        }
    }

    pub fn root_folder_id(&self) -> &RemoteId {
        &self.root_folder_id
    }

    fn context(&self) -> OperationContext {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Selector parameters shaped by the default operation context
    fn object_query(&self, selector: &str, id: &RemoteId) -> Params {
        let context = self.context();
        let mut query: Params = vec![
            ("objectId", id.as_str().to_string()),
            ("cmisselector", selector.to_string()),
            ("succinct", "true".to_string()),
            (
                "includeAllowableActions",
                context.include_allowable_actions.to_string(),
            ),
        ];
        if !context.filter.is_empty() {
            query.push(("filter", context.filter.join(",")));
        }
        query
    }

    fn action(action: &str, id: &RemoteId) -> Params {
        vec![
            ("cmisaction", action.to_string()),
            ("objectId", id.as_str().to_string()),
            ("succinct", "true".to_string()),
        ]
    }

    fn multipart(params: Params, name: &str, content: Vec<u8>) -> Form {
        let form = params
            .into_iter()
            .fold(Form::new(), |form, (key, value)| form.text(key, value));
        form.part("content", Part::bytes(content).file_name(name.to_string()))
    }

    /// Parent of a document, which the object payload does not carry
    async fn parent_of(&self, id: &RemoteId) -> Result<Option<RemoteId>, CmisError> {
        let parents: Vec<ObjectParent> = self
            .client
            .get_json(&self.root_folder_url, &self.object_query("parents", id))
            .await?;
        parents
            .first()
            .map(|parent| parent.object.object_id())
            .transpose()
    }

    /// Convert a payload, looking up the parent if it is missing
    async fn complete(
        &self,
        data: &ObjectData,
        parent_hint: Option<&RemoteId>,
    ) -> Result<RemoteObject, CmisError> {
        let id = data.object_id()?;
        let Some(mut object) = data.to_remote_object(parent_hint)? else {
            return Err(CmisError::ObjectNotFound(format!(
                "{id} is neither a document nor a folder"
            )));
        };
        if id == self.root_folder_id {
            object.parent_id = None;
        } else if object.parent_id.is_none() {
            object.parent_id = self.parent_of(&id).await?;
        }
        Ok(object)
    }
}

#[async_trait]
impl ISession for CmisSession {
    fn repository_id(&self) -> &str {
        &self.repository_id
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        self.capabilities
    }

    fn set_default_context(&self, context: OperationContext) {
        *self.context.lock().unwrap_or_else(PoisonError::into_inner) = context;
    }

    fn default_context(&self) -> OperationContext {
        self.context()
    }

    async fn get_root_folder(&self) -> Result<RemoteObject, CmisError> {
        let root_id = self.root_folder_id.clone();
        self.get_object(&root_id).await
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn get_object(&self, id: &RemoteId) -> Result<RemoteObject, CmisError> {
        let data: ObjectData = self
            .client
            .get_json(&self.root_folder_url, &self.object_query("object", id))
            .await?;
        self.complete(&data, None).await
    }

    #[instrument(skip(self), fields(folder = %folder_id))]
    async fn get_children(&self, folder_id: &RemoteId) -> Result<Vec<RemoteObject>, CmisError> {
        let page_size = self.context().max_items_per_page.max(1);
        let mut children = Vec::new();
        let mut skip = 0u64;

        loop {
            let mut query = self.object_query("children", folder_id);
            query.push(("maxItems", page_size.to_string()));
            query.push(("skipCount", skip.to_string()));
            let page: ChildrenList = self.client.get_json(&self.root_folder_url, &query).await?;

            let fetched = page.objects.len() as u64;
            for entry in &page.objects {
                if let Some(object) = entry.object.to_remote_object(Some(folder_id))? {
                    children.push(object);
                }
            }
            if !page.has_more_items || fetched == 0 {
                break;
            }
            skip += fetched;
        }

        debug!(count = children.len(), "Listed children");
        Ok(children)
    }

    #[instrument(skip(self))]
    async fn get_content_changes(
        &self,
        token: Option<&ChangeToken>,
        max_items: u32,
    ) -> Result<ChangeLogPage, CmisError> {
        let mut query: Params = vec![
            ("cmisselector", "contentChanges".to_string()),
            ("succinct", "true".to_string()),
            ("includeProperties", "false".to_string()),
            ("maxItems", max_items.to_string()),
        ];
        if let Some(token) = token {
            query.push(("changeLogToken", token.as_str().to_string()));
        }

        let changes: ContentChanges = self.client.get_json(&self.repository_url, &query).await?;
        let entries = changes
            .objects
            .iter()
            .map(ObjectData::to_change_log_entry)
            .collect::<Result<Vec<_>, _>>()?;
        let latest_token = changes
            .change_log_token
            .and_then(|token| ChangeToken::new(token).ok());

        Ok(ChangeLogPage {
            entries,
            latest_token,
            has_more: changes.has_more_items,
        })
    }

    async fn latest_change_log_token(&self) -> Result<Option<ChangeToken>, CmisError> {
        let query: Params = vec![("cmisselector", "repositoryInfo".to_string())];
        let infos: RepositoryInfos = self.client.get_json(&self.repository_url, &query).await?;
        let info = infos.get(&self.repository_id).ok_or_else(|| {
            CmisError::Runtime(format!("Repository {} disappeared", self.repository_id))
        })?;
        Ok(info
            .latest_change_log_token
            .as_deref()
            .and_then(|token| ChangeToken::new(token).ok()))
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn get_content(&self, id: &RemoteId) -> Result<Vec<u8>, CmisError> {
        let query: Params = vec![
            ("objectId", id.as_str().to_string()),
            ("cmisselector", "content".to_string()),
        ];
        self.client.get_bytes(&self.root_folder_url, &query).await
    }

    async fn create_folder(
        &self,
        parent_id: &RemoteId,
        name: &str,
    ) -> Result<RemoteObject, CmisError> {
        let mut form = Self::action("createFolder", parent_id);
        form.extend([
            ("propertyId[0]", "cmis:objectTypeId".to_string()),
            ("propertyValue[0]", "cmis:folder".to_string()),
            ("propertyId[1]", "cmis:name".to_string()),
            ("propertyValue[1]", name.to_string()),
        ]);
        let data: ObjectData = self.client.post_form(&self.root_folder_url, &form).await?;
        self.complete(&data, Some(parent_id)).await
    }

    async fn create_document(
        &self,
        parent_id: &RemoteId,
        name: &str,
        content: Vec<u8>,
    ) -> Result<RemoteObject, CmisError> {
        let mut params = Self::action("createDocument", parent_id);
        params.extend([
            ("propertyId[0]", "cmis:objectTypeId".to_string()),
            ("propertyValue[0]", "cmis:document".to_string()),
            ("propertyId[1]", "cmis:name".to_string()),
            ("propertyValue[1]", name.to_string()),
        ]);
        let form = Self::multipart(params, name, content);
        let data: ObjectData = self
            .client
            .post_multipart(&self.root_folder_url, form)
            .await?;
        self.complete(&data, Some(parent_id)).await
    }

    async fn set_content(&self, id: &RemoteId, content: Vec<u8>) -> Result<RemoteObject, CmisError> {
        let mut params = Self::action("setContent", id);
        params.push(("overwriteFlag", "true".to_string()));
        let form = Self::multipart(params, id.as_str(), content);
        let data: ObjectData = self
            .client
            .post_multipart(&self.root_folder_url, form)
            .await?;
        self.complete(&data, None).await
    }

    async fn delete_object(&self, id: &RemoteId) -> Result<(), CmisError> {
        let object = self.get_object(id).await?;
        let mut form = if object.is_folder() {
            let mut form = Self::action("deleteTree", id);
            form.push(("continueOnFailure", "false".to_string()));
            form
        } else {
            Self::action("delete", id)
        };
        form.push(("allVersions", "true".to_string()));
        self.client
            .post_form_empty(&self.root_folder_url, &form)
            .await
    }

    async fn move_object(
        &self,
        id: &RemoteId,
        source_folder_id: &RemoteId,
        target_folder_id: &RemoteId,
    ) -> Result<RemoteObject, CmisError> {
        let mut form = Self::action("move", id);
        form.extend([
            ("sourceFolderId", source_folder_id.as_str().to_string()),
            ("targetFolderId", target_folder_id.as_str().to_string()),
        ]);
        let data: ObjectData = self.client.post_form(&self.root_folder_url, &form).await?;
        let mut object = self.complete(&data, Some(target_folder_id)).await?;
        object.parent_id = Some(target_folder_id.clone());
        Ok(object)
    }

    async fn rename_object(&self, id: &RemoteId, new_name: &str) -> Result<RemoteObject, CmisError> {
        let mut form = Self::action("update", id);
        form.extend([
            ("propertyId[0]", "cmis:name".to_string()),
            ("propertyValue[0]", new_name.to_string()),
        ]);
        let data: ObjectData = self.client.post_form(&self.root_folder_url, &form).await?;
        self.complete(&data, None).await
    }
}
