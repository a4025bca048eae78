//! Integration tests for the CMIS browser-binding adapter
//!
//! Uses wiremock to simulate a CMIS server and drives the adapter through
//! the `ISessionFactory` and `ISession` ports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reposync_cmis::CmisSessionFactory;
use reposync_core::domain::{ChangeToken, CmisError, MappedObjectType, RemoteId};
use reposync_core::ports::{
    IAuthenticationProvider, ISession, ISessionFactory, RemoteChangeType, SessionParameters,
    StoredCookie,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test helpers
// ============================================================================

fn rid(id: &str) -> RemoteId {
    RemoteId::new(id).unwrap()
}

fn parameters(server: &MockServer) -> SessionParameters {
    parameters_for(&server.uri())
}

fn parameters_for(base_uri: &str) -> SessionParameters {
    let mut params = HashMap::new();
    params.insert("browser-url".to_string(), format!("{base_uri}/browser"));
    params.insert("repository-id".to_string(), "repo".to_string());
    params.insert("user".to_string(), "alice".to_string());
    params.insert("password".to_string(), "secret".to_string());
    params.insert("binding-type".to_string(), "browser".to_string());
    params
}

fn repository_infos(server: &MockServer, changes: &str) -> serde_json::Value {
    json!({
        "repo": {
            "repositoryId": "repo",
            "rootFolderId": "root",
            "repositoryUrl": format!("{}/browser/repo", server.uri()),
            "rootFolderUrl": format!("{}/browser/repo/root", server.uri()),
            "latestChangeLogToken": "42",
            "capabilities": { "capabilityChanges": changes }
        }
    })
}

fn document(id: &str, name: &str) -> serde_json::Value {
    json!({
        "succinctProperties": {
            "cmis:objectId": id,
            "cmis:baseTypeId": "cmis:document",
            "cmis:name": name,
            "cmis:changeToken": "1",
            "cmis:contentStreamLength": 5
        }
    })
}

fn folder(id: &str, parent: &str, name: &str) -> serde_json::Value {
    json!({
        "succinctProperties": {
            "cmis:objectId": id,
            "cmis:baseTypeId": "cmis:folder",
            "cmis:name": name,
            "cmis:parentId": parent
        }
    })
}

/// Mounts the service document and the type definition lookup
async fn mount_login(server: &MockServer, changes: &str, selective_ignore: bool) {
    Mock::given(method("GET"))
        .and(path("/browser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_infos(server, changes)))
        .mount(server)
        .await;

    let type_response = if selective_ignore {
        ResponseTemplate::new(200).set_body_json(json!({ "id": "gds:sync" }))
    } else {
        ResponseTemplate::new(404).set_body_json(json!({
            "exception": "objectNotFound",
            "message": "Unknown type"
        }))
    };
    Mock::given(method("GET"))
        .and(path("/browser/repo"))
        .and(query_param("cmisselector", "typeDefinition"))
        .respond_with(type_response)
        .mount(server)
        .await;
}

async fn open(server: &MockServer) -> Arc<dyn ISession> {
    CmisSessionFactory::new()
        .create_session(&parameters(server), None)
        .await
        .expect("session should open")
}

#[derive(Default)]
struct RecordingProvider {
    cookies: Mutex<HashMap<String, Vec<StoredCookie>>>,
}

#[async_trait]
impl IAuthenticationProvider for RecordingProvider {
    async fn load_cookies(&self, url: &str) -> anyhow::Result<Vec<StoredCookie>> {
        Ok(self
            .cookies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_cookies(&self, url: &str, cookies: &[StoredCookie]) -> anyhow::Result<()> {
        self.cookies
            .lock()
            .unwrap()
            .insert(url.to_string(), cookies.to_vec());
        Ok(())
    }

    async fn delete_cookies(&self, url: &str) -> anyhow::Result<()> {
        self.cookies.lock().unwrap().remove(url);
        Ok(())
    }
}

// ============================================================================
// Login
// ============================================================================

#[tokio::test]
async fn test_login_detects_capabilities() {
    let server = MockServer::start().await;
    mount_login(&server, "objectidsonly", true).await;

    let session = open(&server).await;
    assert_eq!(session.repository_id(), "repo");
    let caps = session.capabilities();
    assert!(caps.change_log);
    assert!(caps.selective_ignore);
}

#[tokio::test]
async fn test_login_without_change_log_or_ignore_type() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;

    let caps = open(&server).await.capabilities();
    assert!(!caps.change_log);
    assert!(!caps.selective_ignore);
}

#[tokio::test]
async fn test_rejected_credentials_carry_retry_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/browser"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("Retry-After", "300")
                .set_body_json(json!({ "exception": "permissionDenied", "message": "Bad credentials" })),
        )
        .mount(&server)
        .await;

    let err = CmisSessionFactory::new()
        .create_session(&parameters(&server), None)
        .await
        .err()
        .expect("login should fail");
    assert_eq!(
        err,
        CmisError::PermissionDenied {
            message: "Bad credentials".into(),
            retry_hint: Some("300".into()),
        }
    );
}

#[tokio::test]
async fn test_proxy_and_server_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/browser"))
        .respond_with(ResponseTemplate::new(407))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browser"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let factory = CmisSessionFactory::new();
    let first = factory.create_session(&parameters(&server), None).await.err();
    assert!(matches!(first, Some(CmisError::ProxyAuthRequired(_))));
    let second = factory.create_session(&parameters(&server), None).await.err();
    assert!(matches!(second, Some(CmisError::Connection(_))));
}

#[tokio::test]
async fn test_unreachable_server_is_a_connection_error() {
    // MockServer ports are pooled and stay served after drop; use a port
    // nothing listens on instead.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let params = parameters_for(&format!("http://127.0.0.1:{port}"));

    let err = CmisSessionFactory::new()
        .create_session(&params, None)
        .await
        .err();
    assert!(matches!(err, Some(CmisError::Connection(_))), "got {err:?}");
}

#[tokio::test]
async fn test_unknown_repository_is_a_runtime_error() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;
    let mut params = parameters(&server);
    params.insert("repository-id".to_string(), "other".to_string());

    let err = CmisSessionFactory::new()
        .create_session(&params, None)
        .await
        .err();
    assert!(matches!(err, Some(CmisError::Runtime(m)) if m.contains("other")));
}

#[tokio::test]
async fn test_cookies_are_persisted_and_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/browser"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "JSESSIONID=s1; Path=/; HttpOnly")
                .set_body_json(repository_infos(&server, "none")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browser/repo"))
        .and(query_param("cmisselector", "typeDefinition"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browser/repo/root"))
        .and(query_param("cmisselector", "content"))
        .and(header("Cookie", "JSESSIONID=s1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .mount(&server)
        .await;

    let provider = Arc::new(RecordingProvider::default());
    let session = CmisSessionFactory::new()
        .create_session(&parameters(&server), Some(provider.clone()))
        .await
        .unwrap();

    let stored = provider
        .load_cookies(&format!("{}/browser", server.uri()))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "JSESSIONID");

    let content = session.get_content(&rid("doc")).await.unwrap();
    assert_eq!(content, b"hello");
}

#[tokio::test]
async fn test_atompub_binding_is_rejected() {
    let mut params = HashMap::new();
    params.insert("binding-type".to_string(), "atompub".to_string());
    params.insert(
        "atompub-url".to_string(),
        "https://cmis.example.com/atom".to_string(),
    );
    let err = CmisSessionFactory::new()
        .create_session(&params, None)
        .await
        .err();
    assert!(matches!(err, Some(CmisError::Runtime(_))));
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_get_object_resolves_document_parent() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;
    Mock::given(method("GET"))
        .and(path("/browser/repo/root"))
        .and(query_param("cmisselector", "object"))
        .and(query_param("objectId", "doc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("doc", "a.txt")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browser/repo/root"))
        .and(query_param("cmisselector", "parents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "object": folder("docs", "root", "docs"), "relativePathSegment": "a.txt" }
        ])))
        .mount(&server)
        .await;

    let session = open(&server).await;
    let object = session.get_object(&rid("doc")).await.unwrap();
    assert_eq!(object.name, "a.txt");
    assert_eq!(object.object_type, MappedObjectType::File);
    assert_eq!(object.parent_id, Some(rid("docs")));
    assert_eq!(object.content_length, Some(5));
}

#[tokio::test]
async fn test_root_folder_has_no_parent() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;
    Mock::given(method("GET"))
        .and(path("/browser/repo/root"))
        .and(query_param("cmisselector", "object"))
        .and(query_param("objectId", "root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "succinctProperties": {
                "cmis:objectId": "root",
                "cmis:baseTypeId": "cmis:folder",
                "cmis:name": ""
            }
        })))
        .mount(&server)
        .await;

    let root = open(&server).await.get_root_folder().await.unwrap();
    assert_eq!(root.id, rid("root"));
    assert!(root.parent_id.is_none());
}

#[tokio::test]
async fn test_missing_object_maps_to_not_found() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;
    Mock::given(method("GET"))
        .and(path("/browser/repo/root"))
        .and(query_param("cmisselector", "object"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "exception": "objectNotFound",
            "message": "gone"
        })))
        .mount(&server)
        .await;

    let err = open(&server).await.get_object(&rid("x")).await.err();
    assert_eq!(err, Some(CmisError::ObjectNotFound("gone".into())));
}

#[tokio::test]
async fn test_children_are_paged() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;
    Mock::given(method("GET"))
        .and(path("/browser/repo/root"))
        .and(query_param("cmisselector", "children"))
        .and(query_param("skipCount", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [
                { "object": document("a", "a.txt") },
                { "object": folder("sub", "root", "sub") }
            ],
            "hasMoreItems": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browser/repo/root"))
        .and(query_param("cmisselector", "children"))
        .and(query_param("skipCount", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [ { "object": document("b", "b.txt") } ],
            "hasMoreItems": false
        })))
        .mount(&server)
        .await;

    let children = open(&server).await.get_children(&rid("root")).await.unwrap();
    let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "sub", "b.txt"]);
    assert!(children.iter().all(|c| c.parent_id == Some(rid("root"))));
}

#[tokio::test]
async fn test_content_changes_page() {
    let server = MockServer::start().await;
    mount_login(&server, "all", false).await;
    Mock::given(method("GET"))
        .and(path("/browser/repo"))
        .and(query_param("cmisselector", "contentChanges"))
        .and(query_param("changeLogToken", "40"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [
                {
                    "succinctProperties": { "cmis:objectId": ["a"] },
                    "changeEventInfo": { "changeType": "created", "changeTime": 1000 }
                },
                {
                    "succinctProperties": { "cmis:objectId": ["b"] },
                    "changeEventInfo": { "changeType": "deleted" }
                }
            ],
            "hasMoreItems": true,
            "changeLogToken": "42"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browser/repo"))
        .and(query_param("cmisselector", "repositoryInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_infos(&server, "all")))
        .mount(&server)
        .await;

    let session = open(&server).await;
    let token = ChangeToken::new("40").unwrap();
    let page = session.get_content_changes(Some(&token), 100).await.unwrap();
    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.entries[0].change_type, RemoteChangeType::Created);
    assert_eq!(page.entries[1].object_id, rid("b"));
    assert_eq!(page.latest_token, Some(ChangeToken::new("42").unwrap()));
    assert!(page.has_more);

    assert_eq!(
        session.latest_change_log_token().await.unwrap(),
        Some(ChangeToken::new("42").unwrap())
    );
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_create_document_sends_multipart() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;
    Mock::given(method("POST"))
        .and(path("/browser/repo/root"))
        .and(body_string_contains("createDocument"))
        .and(body_string_contains("file body"))
        .respond_with(ResponseTemplate::new(201).set_body_json(document("new", "n.txt")))
        .expect(1)
        .mount(&server)
        .await;

    let created = open(&server)
        .await
        .create_document(&rid("docs"), "n.txt", b"file body".to_vec())
        .await
        .unwrap();
    assert_eq!(created.id, rid("new"));
    assert_eq!(created.parent_id, Some(rid("docs")));
}

#[tokio::test]
async fn test_create_folder_name_clash_is_a_constraint() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;
    Mock::given(method("POST"))
        .and(path("/browser/repo/root"))
        .and(body_string_contains("cmisaction=createFolder"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "exception": "nameConstraintViolation",
            "message": "exists"
        })))
        .mount(&server)
        .await;

    let err = open(&server)
        .await
        .create_folder(&rid("root"), "docs")
        .await
        .err();
    assert_eq!(err, Some(CmisError::Constraint("exists".into())));
}

#[tokio::test]
async fn test_move_and_delete_folder() {
    let server = MockServer::start().await;
    mount_login(&server, "none", false).await;
    Mock::given(method("POST"))
        .and(path("/browser/repo/root"))
        .and(body_string_contains("cmisaction=move"))
        .and(body_string_contains("targetFolderId=dest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder("sub", "dest", "sub")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browser/repo/root"))
        .and(query_param("cmisselector", "object"))
        .respond_with(ResponseTemplate::new(200).set_body_json(folder("sub", "dest", "sub")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/browser/repo/root"))
        .and(body_string_contains("cmisaction=deleteTree"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = open(&server).await;
    let moved = session
        .move_object(&rid("sub"), &rid("root"), &rid("dest"))
        .await
        .unwrap();
    assert_eq!(moved.parent_id, Some(rid("dest")));

    session.delete_object(&rid("sub")).await.unwrap();
}
