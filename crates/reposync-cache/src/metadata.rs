//! SQLite implementation of IMetaDataStorage
//!
//! Mapped objects are keyed by remote id; the local path of a record is
//! never stored but derived from the parent chain by the provided methods
//! on the port. The change-log token lives in the key/value `metadata`
//! table.

use async_trait::async_trait;
use reposync_core::domain::{ChangeToken, ContentHash, MappedObject, MappedObjectType, RemoteId};
use reposync_core::ports::IMetaDataStorage;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::rows::{
    parse_optional_datetime, parse_optional_remote_id, parse_optional_token, parse_remote_id,
    parse_unique_id, to_i64, to_u64,
};
use crate::CacheError;

const CHANGE_LOG_TOKEN_KEY: &str = "change_log_token";

/// SQLite-backed store of mapped objects and the change-log position
#[derive(Clone)]
pub struct SqliteMetaDataStorage {
    pool: SqlitePool,
}

impl SqliteMetaDataStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored records, root included
    pub async fn count(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mapped_objects")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

fn mapped_object_from_row(row: &SqliteRow) -> Result<MappedObject, CacheError> {
    let id: String = row.get("id");
    let object_type: String = row.get("object_type");
    let object_type = MappedObjectType::parse(&object_type).ok_or_else(|| {
        CacheError::SerializationError(format!("Unknown object type: {}", object_type))
    })?;

    let checksum_type: Option<String> = row.get("checksum_type");
    let checksum: Option<String> = row.get("checksum");
    let checksum = match (checksum_type, checksum) {
        (Some(algorithm), Some(digest)) => Some(
            ContentHash::new(algorithm, digest)
                .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        ),
        _ => None,
    };

    Ok(MappedObject {
        id: parse_unique_id(&id)?,
        remote_id: parse_remote_id(row.get("remote_id"))?,
        parent_id: parse_optional_remote_id(row.get("parent_id"))?,
        object_type,
        name: row.get("name"),
        change_token: parse_optional_token(row.get("change_token"))?,
        last_remote_write: parse_optional_datetime(row.get("last_remote_write"))?,
        last_local_write: parse_optional_datetime(row.get("last_local_write"))?,
        checksum,
        content_size: to_u64(row.get("content_size")),
    })
}

#[async_trait]
impl IMetaDataStorage for SqliteMetaDataStorage {
    async fn save_mapped_object(&self, object: &MappedObject) -> anyhow::Result<()> {
        // The row id of an existing record wins over the one on `object`
        sqlx::query(
            "INSERT INTO mapped_objects \
             (id, remote_id, parent_id, object_type, name, change_token, \
              last_remote_write, last_local_write, checksum_type, checksum, content_size) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(remote_id) DO UPDATE SET \
              parent_id = excluded.parent_id, \
              object_type = excluded.object_type, \
              name = excluded.name, \
              change_token = excluded.change_token, \
              last_remote_write = excluded.last_remote_write, \
              last_local_write = excluded.last_local_write, \
              checksum_type = excluded.checksum_type, \
              checksum = excluded.checksum, \
              content_size = excluded.content_size",
        )
        .bind(object.id.to_string())
        .bind(object.remote_id.as_str())
        .bind(object.parent_id.as_ref().map(RemoteId::as_str))
        .bind(object.object_type.as_str())
        .bind(&object.name)
        .bind(object.change_token.as_ref().map(ChangeToken::as_str))
        .bind(object.last_remote_write.map(|dt| dt.to_rfc3339()))
        .bind(object.last_local_write.map(|dt| dt.to_rfc3339()))
        .bind(object.checksum.as_ref().map(ContentHash::algorithm))
        .bind(object.checksum.as_ref().map(ContentHash::digest))
        .bind(to_i64(object.content_size))
        .execute(&self.pool)
        .await?;

        tracing::trace!(remote_id = %object.remote_id, name = %object.name, "Saved mapped object");
        Ok(())
    }

    async fn get_object_by_remote_id(
        &self,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<MappedObject>> {
        let row = sqlx::query("SELECT * FROM mapped_objects WHERE remote_id = ?")
            .bind(remote_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(mapped_object_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_children(&self, parent_id: &RemoteId) -> anyhow::Result<Vec<MappedObject>> {
        let rows = sqlx::query("SELECT * FROM mapped_objects WHERE parent_id = ? ORDER BY name")
            .bind(parent_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut children = Vec::with_capacity(rows.len());
        for row in &rows {
            children.push(mapped_object_from_row(row)?);
        }
        Ok(children)
    }

    async fn get_root(&self) -> anyhow::Result<Option<MappedObject>> {
        let row = sqlx::query("SELECT * FROM mapped_objects WHERE parent_id IS NULL LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(mapped_object_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn remove_object(&self, remote_id: &RemoteId) -> anyhow::Result<()> {
        let result = sqlx::query(
            "WITH RECURSIVE subtree(remote_id) AS ( \
                SELECT ? \
                UNION ALL \
                SELECT m.remote_id FROM mapped_objects m \
                JOIN subtree s ON m.parent_id = s.remote_id \
             ) \
             DELETE FROM mapped_objects WHERE remote_id IN (SELECT remote_id FROM subtree)",
        )
        .bind(remote_id.as_str())
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            remote_id = %remote_id,
            removed = result.rows_affected(),
            "Removed mapped objects"
        );
        Ok(())
    }

    async fn get_change_log_token(&self) -> anyhow::Result<Option<ChangeToken>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?")
            .bind(CHANGE_LOG_TOKEN_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(parse_optional_token(value)?)
    }

    async fn set_change_log_token(&self, token: Option<&ChangeToken>) -> anyhow::Result<()> {
        match token {
            Some(token) => {
                sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)")
                    .bind(CHANGE_LOG_TOKEN_KEY)
                    .bind(token.as_str())
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM metadata WHERE key = ?")
                    .bind(CHANGE_LOG_TOKEN_KEY)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}
