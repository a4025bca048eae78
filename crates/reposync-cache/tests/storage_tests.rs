//! Integration tests for the SQLite storage adapters
//!
//! Each test creates a fresh in-memory database to ensure isolation.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};

use reposync_cache::{
    DatabasePool, SqliteCookieStorage, SqliteFileTransmissionStorage,
    SqliteIgnoredEntitiesStorage, SqliteMetaDataStorage,
};
use reposync_core::domain::{ChangeToken, ContentHash, MappedObject, MappedObjectType, RemoteId};
use reposync_core::events::TransmissionType;
use reposync_core::ports::{
    FileTransmission, IAuthenticationProvider, IFileTransmissionStorage,
    IIgnoredEntitiesStorage, IMetaDataStorage, IgnoredEntity, StoredCookie,
};

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> DatabasePool {
    DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database")
}

fn rid(id: &str) -> RemoteId {
    RemoteId::new(id).unwrap()
}

fn folder(id: &str, parent: &str, name: &str) -> MappedObject {
    MappedObject::new(rid(id), Some(rid(parent)), MappedObjectType::Folder, name)
}

fn file(id: &str, parent: &str, name: &str) -> MappedObject {
    let mut object = MappedObject::new(rid(id), Some(rid(parent)), MappedObjectType::File, name);
    object.checksum = Some(ContentHash::sha256_from_bytes(&[0xab, 0xcd]));
    object.content_size = Some(2);
    object.change_token = Some(ChangeToken::new("tok-1").unwrap());
    object.last_remote_write = Some(Utc::now());
    object
}

/// root
/// └── docs
///     ├── a.txt
///     └── sub
///         └── b.txt
async fn seed_tree(storage: &SqliteMetaDataStorage) {
    storage
        .save_mapped_object(&MappedObject::root(rid("root"), None))
        .await
        .unwrap();
    for object in [
        folder("docs", "root", "docs"),
        file("a", "docs", "a.txt"),
        folder("sub", "docs", "sub"),
        file("b", "sub", "b.txt"),
    ] {
        storage.save_mapped_object(&object).await.unwrap();
    }
}

// ============================================================================
// Mapped objects
// ============================================================================

#[tokio::test]
async fn test_save_and_get_mapped_object() {
    let pool = setup().await;
    let storage = SqliteMetaDataStorage::new(pool.pool().clone());
    let object = file("a", "docs", "a.txt");

    storage.save_mapped_object(&object).await.unwrap();
    let loaded = storage
        .get_object_by_remote_id(&rid("a"))
        .await
        .unwrap()
        .expect("object should exist");

    assert_eq!(loaded.id, object.id);
    assert_eq!(loaded.parent_id, Some(rid("docs")));
    assert_eq!(loaded.object_type, MappedObjectType::File);
    assert_eq!(loaded.checksum, object.checksum);
    assert_eq!(loaded.content_size, Some(2));
    assert_eq!(loaded.change_token, object.change_token);
    assert_eq!(
        loaded.last_remote_write.map(|dt| dt.timestamp_millis()),
        object.last_remote_write.map(|dt| dt.timestamp_millis())
    );
    assert!(loaded.last_local_write.is_none());
}

#[tokio::test]
async fn test_get_missing_object_returns_none() {
    let pool = setup().await;
    let storage = SqliteMetaDataStorage::new(pool.pool().clone());
    assert!(storage
        .get_object_by_remote_id(&rid("nope"))
        .await
        .unwrap()
        .is_none());
    assert!(storage.get_root().await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_updates_existing_record_by_remote_id() {
    let pool = setup().await;
    let storage = SqliteMetaDataStorage::new(pool.pool().clone());
    let original = file("a", "docs", "a.txt");
    storage.save_mapped_object(&original).await.unwrap();

    // A fresh record for the same remote id keeps the stored row id
    let mut renamed = file("a", "other", "renamed.txt");
    renamed.checksum = None;
    storage.save_mapped_object(&renamed).await.unwrap();

    let loaded = storage.get_object_by_remote_id(&rid("a")).await.unwrap().unwrap();
    assert_eq!(loaded.id, original.id);
    assert_eq!(loaded.name, "renamed.txt");
    assert_eq!(loaded.parent_id, Some(rid("other")));
    assert!(loaded.checksum.is_none());
    assert_eq!(storage.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_root_and_children() {
    let pool = setup().await;
    let storage = SqliteMetaDataStorage::new(pool.pool().clone());
    seed_tree(&storage).await;

    let root = storage.get_root().await.unwrap().unwrap();
    assert_eq!(root.remote_id, rid("root"));
    assert!(root.is_root());

    let children = storage.get_children(&rid("docs")).await.unwrap();
    let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "sub"]);
}

#[tokio::test]
async fn test_relative_paths_follow_parent_chain() {
    let pool = setup().await;
    let storage = SqliteMetaDataStorage::new(pool.pool().clone());
    seed_tree(&storage).await;

    let b = storage.get_object_by_remote_id(&rid("b")).await.unwrap().unwrap();
    assert_eq!(
        storage.get_relative_path(&b).await.unwrap(),
        Some(PathBuf::from("docs/sub/b.txt"))
    );

    let root = storage.get_root().await.unwrap().unwrap();
    assert_eq!(
        storage.get_relative_path(&root).await.unwrap(),
        Some(PathBuf::new())
    );

    let found = storage
        .get_object_by_relative_path(Path::new("docs/sub/b.txt"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.remote_id, rid("b"));
    assert!(storage
        .get_object_by_relative_path(Path::new("docs/missing"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_remove_object_removes_subtree() {
    let pool = setup().await;
    let storage = SqliteMetaDataStorage::new(pool.pool().clone());
    seed_tree(&storage).await;

    storage.remove_object(&rid("sub")).await.unwrap();
    assert!(storage.get_object_by_remote_id(&rid("sub")).await.unwrap().is_none());
    assert!(storage.get_object_by_remote_id(&rid("b")).await.unwrap().is_none());
    assert!(storage.get_object_by_remote_id(&rid("a")).await.unwrap().is_some());

    storage.remove_object(&rid("docs")).await.unwrap();
    assert_eq!(storage.count().await.unwrap(), 1);

    // Removing an unknown id is not an error
    storage.remove_object(&rid("ghost")).await.unwrap();
}

#[tokio::test]
async fn test_change_log_token_set_and_clear() {
    let pool = setup().await;
    let storage = SqliteMetaDataStorage::new(pool.pool().clone());
    assert!(storage.get_change_log_token().await.unwrap().is_none());

    let first = ChangeToken::new("100").unwrap();
    let second = ChangeToken::new("101").unwrap();
    storage.set_change_log_token(Some(&first)).await.unwrap();
    storage.set_change_log_token(Some(&second)).await.unwrap();
    assert_eq!(storage.get_change_log_token().await.unwrap(), Some(second));

    storage.set_change_log_token(None).await.unwrap();
    assert!(storage.get_change_log_token().await.unwrap().is_none());
}

// ============================================================================
// Ignored entities
// ============================================================================

#[tokio::test]
async fn test_ignored_entities_add_list_remove() {
    let pool = setup().await;
    let storage = SqliteIgnoredEntitiesStorage::new(pool.pool().clone());

    storage
        .add(&IgnoredEntity {
            remote_id: rid("music"),
            local_path: PathBuf::from("media/music"),
        })
        .await
        .unwrap();
    storage
        .add(&IgnoredEntity {
            remote_id: rid("archive"),
            local_path: PathBuf::from("archive"),
        })
        .await
        .unwrap();

    let listed = storage.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].local_path, PathBuf::from("archive"));

    assert!(storage.is_ignored_id(&rid("music")).await.unwrap());
    assert!(!storage.is_ignored_id(&rid("media")).await.unwrap());
    assert!(storage
        .is_ignored_path(Path::new("media/music/song.mp3"))
        .await
        .unwrap());
    assert!(!storage.is_ignored_path(Path::new("media/video")).await.unwrap());

    storage.remove(&rid("music")).await.unwrap();
    storage.remove(&rid("music")).await.unwrap();
    assert_eq!(storage.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ignored_entity_add_replaces_path() {
    let pool = setup().await;
    let storage = SqliteIgnoredEntitiesStorage::new(pool.pool().clone());
    for path in ["old", "new"] {
        storage
            .add(&IgnoredEntity {
                remote_id: rid("f"),
                local_path: PathBuf::from(path),
            })
            .await
            .unwrap();
    }
    let listed = storage.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].local_path, PathBuf::from("new"));
}

// ============================================================================
// File transmissions
// ============================================================================

#[tokio::test]
async fn test_transmissions_lifecycle() {
    let pool = setup().await;
    let storage = SqliteFileTransmissionStorage::new(pool.pool().clone());
    let path = Path::new("docs/report.pdf");

    let download = FileTransmission {
        path: path.to_path_buf(),
        remote_id: Some(rid("report")),
        direction: TransmissionType::Download,
        started_at: Utc::now() - Duration::seconds(5),
        total_bytes: Some(4096),
    };
    let upload = FileTransmission {
        path: PathBuf::from("new.txt"),
        remote_id: None,
        direction: TransmissionType::Upload,
        started_at: Utc::now(),
        total_bytes: None,
    };
    storage.save_transmission(&download).await.unwrap();
    storage.save_transmission(&upload).await.unwrap();

    let loaded = storage.get_transmission(path).await.unwrap().unwrap();
    assert_eq!(loaded.remote_id, Some(rid("report")));
    assert_eq!(loaded.direction, TransmissionType::Download);
    assert_eq!(loaded.total_bytes, Some(4096));

    let all = storage.list_transmissions().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].path, PathBuf::from("docs/report.pdf"));

    storage.remove_transmission(path).await.unwrap();
    assert!(storage.get_transmission(path).await.unwrap().is_none());
    assert_eq!(storage.list_transmissions().await.unwrap().len(), 1);
}

// ============================================================================
// Cookies
// ============================================================================

fn cookie(name: &str, expires: Option<chrono::DateTime<Utc>>) -> StoredCookie {
    StoredCookie {
        name: name.to_string(),
        value: format!("{name}-value"),
        domain: "cmis.example.com".to_string(),
        path: "/".to_string(),
        expires,
    }
}

#[tokio::test]
async fn test_cookies_are_scoped_by_url_and_replaced_on_save() {
    let pool = setup().await;
    let storage = SqliteCookieStorage::new(pool.pool().clone());
    let url = "https://cmis.example.com/browser";

    storage
        .save_cookies(url, &[cookie("a", None), cookie("b", None)])
        .await
        .unwrap();
    storage
        .save_cookies("https://other.example.com", &[cookie("x", None)])
        .await
        .unwrap();
    assert_eq!(storage.load_cookies(url).await.unwrap().len(), 2);

    storage.save_cookies(url, &[cookie("c", None)]).await.unwrap();
    let loaded = storage.load_cookies(url).await.unwrap();
    assert_eq!(loaded, vec![cookie("c", None)]);

    storage.delete_cookies(url).await.unwrap();
    assert!(storage.load_cookies(url).await.unwrap().is_empty());
    assert_eq!(
        storage
            .load_cookies("https://other.example.com")
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_expired_cookies_are_not_loaded() {
    let pool = setup().await;
    let storage = SqliteCookieStorage::new(pool.pool().clone());
    let url = "https://cmis.example.com/browser";
    let future = Utc::now() + Duration::hours(1);

    storage
        .save_cookies(
            url,
            &[
                cookie("old", Some(Utc::now() - Duration::hours(1))),
                cookie("fresh", Some(future)),
            ],
        )
        .await
        .unwrap();

    let loaded = storage.load_cookies(url).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name, "fresh");

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cookies")
        .fetch_one(pool.pool())
        .await
        .unwrap();
    assert_eq!(stored, 1);
}
