//! Repository connection settings
//!
//! [`RepoInfo`] is the read-only view of one configured repository. The
//! connection scheduler turns it into the string-keyed parameter map that
//! session factories consume, and compares two values to decide whether a
//! configuration change actually requires reconnecting.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Session parameter keys
// ============================================================================

/// Keys of the parameter map handed to an `ISessionFactory`
pub mod session_keys {
    pub const USER: &str = "user";
    pub const PASSWORD: &str = "password";
    pub const USER_AGENT: &str = "user-agent";
    pub const CONNECT_TIMEOUT: &str = "connect-timeout";
    pub const READ_TIMEOUT: &str = "read-timeout";
    pub const REPOSITORY_ID: &str = "repository-id";
    pub const BINDING_TYPE: &str = "binding-type";
    pub const AUTH_TYPE: &str = "auth-type";
    /// Service URL, only set for the AtomPub binding
    pub const ATOMPUB_URL: &str = "atompub-url";
    /// Service URL, only set for the browser binding
    pub const BROWSER_URL: &str = "browser-url";
}

// ============================================================================
// Enums
// ============================================================================

/// How credentials are presented to the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationType {
    #[default]
    Basic,
    Ntlm,
    Kerberos,
    Shibboleth,
}

impl AuthenticationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Ntlm => "ntlm",
            Self::Kerberos => "kerberos",
            Self::Shibboleth => "shibboleth",
        }
    }
}

impl fmt::Display for AuthenticationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol binding used to talk to the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingType {
    /// JSON browser binding
    #[default]
    Browser,
    /// XML AtomPub binding
    AtomPub,
}

impl BindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::AtomPub => "atompub",
        }
    }
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RepoInfo
// ============================================================================

/// Connection configuration of a single repository
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoInfo {
    /// Display name, also used as the log field `repository`
    pub name: String,
    /// Service URL of the repository
    pub address: String,
    /// Repository id on the server
    pub repository_id: String,
    pub user: String,
    pub password: String,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    pub auth_type: AuthenticationType,
    pub binding: BindingType,
    /// Seconds between remote change polls
    pub poll_interval_secs: u64,
    /// Local folder mirrored against the repository root
    pub local_path: PathBuf,
    /// How often a failed transfer is retried before it is reported
    pub max_retries: u32,
}

impl Default for RepoInfo {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            address: String::new(),
            repository_id: String::new(),
            user: String::new(),
            password: String::new(),
            connect_timeout_ms: 30_000,
            read_timeout_ms: 60_000,
            auth_type: AuthenticationType::default(),
            binding: BindingType::default(),
            poll_interval_secs: 300,
            local_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("RepoSync"),
            max_retries: 3,
        }
    }
}

impl fmt::Debug for RepoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoInfo")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("repository_id", &self.repository_id)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("auth_type", &self.auth_type)
            .field("binding", &self.binding)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("local_path", &self.local_path)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl RepoInfo {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Build the parameter map used to open a session
    ///
    /// The service URL goes under `atompub-url` or `browser-url` depending
    /// on the binding; the other key is left out.
    pub fn session_parameters(&self, user_agent: &str) -> HashMap<String, String> {
        use session_keys::*;

        let mut params = HashMap::new();
        params.insert(USER.to_string(), self.user.clone());
        params.insert(PASSWORD.to_string(), self.password.clone());
        params.insert(USER_AGENT.to_string(), user_agent.to_string());
        params.insert(
            CONNECT_TIMEOUT.to_string(),
            self.connect_timeout_ms.to_string(),
        );
        params.insert(READ_TIMEOUT.to_string(), self.read_timeout_ms.to_string());
        params.insert(REPOSITORY_ID.to_string(), self.repository_id.clone());
        params.insert(BINDING_TYPE.to_string(), self.binding.as_str().to_string());
        params.insert(AUTH_TYPE.to_string(), self.auth_type.as_str().to_string());

        let url_key = match self.binding {
            BindingType::AtomPub => ATOMPUB_URL,
            BindingType::Browser => BROWSER_URL,
        };
        params.insert(url_key.to_string(), self.address.clone());

        params
    }
}
