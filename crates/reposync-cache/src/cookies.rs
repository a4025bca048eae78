//! Cookie persistence for session factories
//!
//! Implements [`IAuthenticationProvider`] on top of the `cookies` table.
//! Cookies are grouped by the service URL they were received from; saving
//! replaces the whole group. Expired cookies are never handed out and are
//! purged whenever a group is loaded.

use async_trait::async_trait;
use chrono::Utc;
use reposync_core::ports::{IAuthenticationProvider, StoredCookie};
use sqlx::{Row, SqlitePool};

use crate::rows::parse_optional_datetime;

#[derive(Clone)]
pub struct SqliteCookieStorage {
    pool: SqlitePool,
}

impl SqliteCookieStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IAuthenticationProvider for SqliteCookieStorage {
    async fn load_cookies(&self, url: &str) -> anyhow::Result<Vec<StoredCookie>> {
        let rows = sqlx::query(
            "SELECT name, value, domain, path, expires FROM cookies WHERE url = ? ORDER BY name",
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut cookies = Vec::with_capacity(rows.len());
        let mut expired = 0usize;
        for row in &rows {
            let cookie = StoredCookie {
                name: row.get("name"),
                value: row.get("value"),
                domain: row.get("domain"),
                path: row.get("path"),
                expires: parse_optional_datetime(row.get("expires"))?,
            };
            if cookie.is_expired(now) {
                expired += 1;
            } else {
                cookies.push(cookie);
            }
        }

        if expired > 0 {
            sqlx::query("DELETE FROM cookies WHERE url = ? AND expires IS NOT NULL AND expires <= ?")
                .bind(url)
                .bind(now.to_rfc3339())
                .execute(&self.pool)
                .await?;
            tracing::debug!(url, expired, "Purged expired cookies");
        }

        Ok(cookies)
    }

    async fn save_cookies(&self, url: &str, cookies: &[StoredCookie]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cookies WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;

        for cookie in cookies {
            sqlx::query(
                "INSERT OR REPLACE INTO cookies (url, name, value, domain, path, expires) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(url)
            .bind(&cookie.name)
            .bind(&cookie.value)
            .bind(&cookie.domain)
            .bind(&cookie.path)
            .bind(cookie.expires.map(|dt| dt.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::trace!(url, count = cookies.len(), "Saved cookies");
        Ok(())
    }

    async fn delete_cookies(&self, url: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cookies WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
