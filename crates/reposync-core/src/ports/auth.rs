//! Authentication provider port
//!
//! Session factories hand the provider the cookies a server sets, so that a
//! reconnect can reuse an existing server-side session instead of sending
//! the credentials again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cookie persisted between sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// `None` for session cookies
    pub expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    /// Returns true if the cookie has an expiry that lies in the past
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(false, |expires| expires <= now)
    }

    /// Render as a `name=value` pair for a `Cookie` request header
    pub fn header_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Cookie persistence used by session factories
#[async_trait]
pub trait IAuthenticationProvider: Send + Sync {
    /// Cookies stored for the given service URL
    async fn load_cookies(&self, url: &str) -> anyhow::Result<Vec<StoredCookie>>;

    /// Replace the cookies stored for the given service URL
    async fn save_cookies(&self, url: &str, cookies: &[StoredCookie]) -> anyhow::Result<()>;

    /// Forget all cookies for the given service URL
    async fn delete_cookies(&self, url: &str) -> anyhow::Result<()>;
}
