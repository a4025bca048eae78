//! SQLite implementation of IIgnoredEntitiesStorage

use async_trait::async_trait;
use reposync_core::domain::RemoteId;
use reposync_core::ports::{IIgnoredEntitiesStorage, IgnoredEntity};
use sqlx::{Row, SqlitePool};

use crate::rows::{parse_remote_id, path_from_string, path_to_string};

/// SQLite-backed set of selectively ignored folders
#[derive(Clone)]
pub struct SqliteIgnoredEntitiesStorage {
    pool: SqlitePool,
}

impl SqliteIgnoredEntitiesStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IIgnoredEntitiesStorage for SqliteIgnoredEntitiesStorage {
    async fn add(&self, entity: &IgnoredEntity) -> anyhow::Result<()> {
        sqlx::query("INSERT OR REPLACE INTO ignored_entities (remote_id, local_path) VALUES (?, ?)")
            .bind(entity.remote_id.as_str())
            .bind(path_to_string(&entity.local_path))
            .execute(&self.pool)
            .await?;
        tracing::debug!(remote_id = %entity.remote_id, "Stored ignored folder");
        Ok(())
    }

    async fn remove(&self, remote_id: &RemoteId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM ignored_entities WHERE remote_id = ?")
            .bind(remote_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<IgnoredEntity>> {
        let rows = sqlx::query("SELECT remote_id, local_path FROM ignored_entities ORDER BY local_path")
            .fetch_all(&self.pool)
            .await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            let local_path: String = row.get("local_path");
            entities.push(IgnoredEntity {
                remote_id: parse_remote_id(row.get("remote_id"))?,
                local_path: path_from_string(&local_path),
            });
        }
        Ok(entities)
    }

    async fn is_ignored_id(&self, remote_id: &RemoteId) -> anyhow::Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM ignored_entities WHERE remote_id = ?")
                .bind(remote_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}
