//! Browser-binding JSON payloads
//!
//! All requests ask for `succinct=true`, so object properties arrive as a
//! flat `succinctProperties` map of property id to value. Dates are epoch
//! milliseconds and multi-valued properties are arrays.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use reposync_core::domain::{ChangeToken, CmisError, ContentHash, MappedObjectType, RemoteId};
use reposync_core::ports::{ChangeLogEntry, RemoteChangeType, RemoteObject};
use serde::Deserialize;
use serde_json::Value;

pub(crate) const OBJECT_ID: &str = "cmis:objectId";
const BASE_TYPE_ID: &str = "cmis:baseTypeId";
const NAME: &str = "cmis:name";
const PARENT_ID: &str = "cmis:parentId";
const CHANGE_TOKEN: &str = "cmis:changeToken";
const LAST_MODIFIED: &str = "cmis:lastModificationDate";
const CONTENT_LENGTH: &str = "cmis:contentStreamLength";
const CONTENT_HASH: &str = "cmis:contentStreamHash";
const IGNORE_DEVICE_IDS: &str = "gds:ignoreDeviceIds";

// ============================================================================
// Repository info
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RepositoryInfo {
    pub repository_id: String,
    pub root_folder_id: String,
    /// Base URL for repository-level selectors
    pub repository_url: Option<String>,
    /// Base URL for object-level selectors and actions
    pub root_folder_url: Option<String>,
    pub latest_change_log_token: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Capabilities {
    #[serde(rename = "capabilityChanges")]
    pub changes: Option<String>,
}

impl RepositoryInfo {
    pub fn has_change_log(&self) -> bool {
        self.capabilities
            .changes
            .as_deref()
            .map_or(false, |changes| changes != "none")
    }
}

/// Response of the service document: repository id to info
pub(crate) type RepositoryInfos = HashMap<String, RepositoryInfo>;

// ============================================================================
// Objects
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ObjectData {
    #[serde(default)]
    pub succinct_properties: HashMap<String, Value>,
    pub change_event_info: Option<ChangeEventInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangeEventInfo {
    pub change_type: String,
    pub change_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ObjectInFolder {
    pub object: ObjectData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChildrenList {
    #[serde(default)]
    pub objects: Vec<ObjectInFolder>,
    #[serde(default)]
    pub has_more_items: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ObjectParent {
    pub object: ObjectData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContentChanges {
    #[serde(default)]
    pub objects: Vec<ObjectData>,
    #[serde(default)]
    pub has_more_items: bool,
    pub change_log_token: Option<String>,
}

fn malformed(what: &str) -> CmisError {
    CmisError::Runtime(format!("Malformed object data: {what}"))
}

/// First value of a (possibly multi-valued) property
fn single(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(values) => values.first(),
        Value::Null => None,
        other => Some(other),
    }
}

impl ObjectData {
    fn string(&self, property: &str) -> Option<&str> {
        self.succinct_properties
            .get(property)
            .and_then(single)
            .and_then(Value::as_str)
    }

    fn integer(&self, property: &str) -> Option<i64> {
        let value = self.succinct_properties.get(property).and_then(single)?;
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }

    fn strings(&self, property: &str) -> Vec<&str> {
        match self.succinct_properties.get(property) {
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) => vec![s.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn object_id(&self) -> Result<RemoteId, CmisError> {
        let id = self.string(OBJECT_ID).ok_or_else(|| malformed("missing cmis:objectId"))?;
        RemoteId::new(id).map_err(|e| malformed(&e.to_string()))
    }

    /// Convert to a [`RemoteObject`]
    ///
    /// Returns `None` for base types other than documents and folders.
    /// `parent` is used when the payload carries no `cmis:parentId`, which
    /// is always the case for documents.
    pub fn to_remote_object(
        &self,
        parent: Option<&RemoteId>,
    ) -> Result<Option<RemoteObject>, CmisError> {
        let object_type = match self.string(BASE_TYPE_ID) {
            Some("cmis:folder") => MappedObjectType::Folder,
            Some("cmis:document") => MappedObjectType::File,
            _ => return Ok(None),
        };

        let parent_id = match self.string(PARENT_ID) {
            Some(id) => Some(RemoteId::new(id).map_err(|e| malformed(&e.to_string()))?),
            None => parent.cloned(),
        };

        Ok(Some(RemoteObject {
            id: self.object_id()?,
            parent_id,
            name: self
                .string(NAME)
                .ok_or_else(|| malformed("missing cmis:name"))?
                .to_string(),
            object_type,
            change_token: self
                .string(CHANGE_TOKEN)
                .and_then(|token| ChangeToken::new(token).ok()),
            last_modified: self.integer(LAST_MODIFIED).and_then(millis_to_datetime),
            content_length: self
                .integer(CONTENT_LENGTH)
                .and_then(|len| u64::try_from(len).ok()),
            content_hash: self
                .strings(CONTENT_HASH)
                .into_iter()
                .find_map(parse_content_hash),
            ignored: !self.strings(IGNORE_DEVICE_IDS).is_empty(),
        }))
    }

    /// Convert a content-changes entry
    pub fn to_change_log_entry(&self) -> Result<ChangeLogEntry, CmisError> {
        let info = self
            .change_event_info
            .as_ref()
            .ok_or_else(|| malformed("missing changeEventInfo"))?;
        let change_type = match info.change_type.as_str() {
            "created" => RemoteChangeType::Created,
            "updated" => RemoteChangeType::Updated,
            "deleted" => RemoteChangeType::Deleted,
            "security" => RemoteChangeType::Security,
            other => return Err(malformed(&format!("unknown change type {other}"))),
        };
        Ok(ChangeLogEntry {
            object_id: self.object_id()?,
            change_type,
            change_time: info.change_time.and_then(millis_to_datetime),
        })
    }
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Parse a `{sha-256}digest` entry; other algorithms are not comparable
/// with local checksums and are skipped
fn parse_content_hash(value: &str) -> Option<ContentHash> {
    let (algorithm, digest) = value.strip_prefix('{')?.split_once('}')?;
    if algorithm.eq_ignore_ascii_case("sha-256") {
        ContentHash::new(ContentHash::SHA256, digest.trim()).ok()
    } else {
        None
    }
}
