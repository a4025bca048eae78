//! SQLite implementation of IFileTransmissionStorage
//!
//! A row exists for as long as a transfer runs. Rows left behind after a
//! crash tell the next start which local files may be incomplete.

use std::path::Path;

use async_trait::async_trait;
use reposync_core::events::TransmissionType;
use reposync_core::ports::{FileTransmission, IFileTransmissionStorage};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::rows::{
    parse_datetime, parse_optional_remote_id, path_from_string, path_to_string, to_i64, to_u64,
};
use crate::CacheError;

#[derive(Clone)]
pub struct SqliteFileTransmissionStorage {
    pool: SqlitePool,
}

impl SqliteFileTransmissionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn transmission_from_row(row: &SqliteRow) -> Result<FileTransmission, CacheError> {
    let path: String = row.get("path");
    let direction: String = row.get("direction");
    let started_at: String = row.get("started_at");

    Ok(FileTransmission {
        path: path_from_string(&path),
        remote_id: parse_optional_remote_id(row.get("remote_id"))?,
        direction: TransmissionType::parse(&direction).ok_or_else(|| {
            CacheError::SerializationError(format!("Unknown transmission direction: {}", direction))
        })?,
        started_at: parse_datetime(&started_at)?,
        total_bytes: to_u64(row.get("total_bytes")),
    })
}

#[async_trait]
impl IFileTransmissionStorage for SqliteFileTransmissionStorage {
    async fn save_transmission(&self, transmission: &FileTransmission) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO file_transmissions \
             (path, remote_id, direction, started_at, total_bytes) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(path_to_string(&transmission.path))
        .bind(transmission.remote_id.as_ref().map(|id| id.as_str()))
        .bind(transmission.direction.as_str())
        .bind(transmission.started_at.to_rfc3339())
        .bind(to_i64(transmission.total_bytes))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_transmission(&self, path: &Path) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM file_transmissions WHERE path = ?")
            .bind(path_to_string(path))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_transmission(&self, path: &Path) -> anyhow::Result<Option<FileTransmission>> {
        let row = sqlx::query("SELECT * FROM file_transmissions WHERE path = ?")
            .bind(path_to_string(path))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(transmission_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_transmissions(&self) -> anyhow::Result<Vec<FileTransmission>> {
        let rows = sqlx::query("SELECT * FROM file_transmissions ORDER BY started_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| transmission_from_row(row).map_err(anyhow::Error::from))
            .collect()
    }
}
