//! Configuration module for RepoSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{BindingType, RepoInfo};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for RepoSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub repositories: Vec<RepoInfo>,
}

/// Connection supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Seconds between reconnection attempts while disconnected.
    pub reconnect_interval_secs: u64,
    /// Value of the `User-Agent` header sent to repositories.
    pub user_agent: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Optional log file; stderr when unset.
    pub file: Option<PathBuf>,
}

/// Local state database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one SQLite database per repository.
    pub data_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/reposync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("reposync")
            .join("config.yaml")
    }

    /// Look up a repository by its display name.
    pub fn repository(&self, name: &str) -> Option<&RepoInfo> {
        self.repositories.iter().find(|repo| repo.name == name)
    }

    /// Path of the state database of a repository.
    pub fn database_path(&self, repo: &RepoInfo) -> PathBuf {
        self.storage.data_dir.join(format!("{}.db", repo.name))
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: 5,
            user_agent: format!("reposync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("reposync"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"connection.reconnect_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- connection ---
        if self.connection.reconnect_interval_secs == 0 {
            errors.push(ValidationError {
                field: "connection.reconnect_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.connection.user_agent.trim().is_empty() {
            errors.push(ValidationError {
                field: "connection.user_agent".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- repositories ---
        let mut seen = std::collections::HashSet::new();
        for (i, repo) in self.repositories.iter().enumerate() {
            let prefix = format!("repositories[{i}]");

            if repo.name.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: "must not be empty".into(),
                });
            } else if !seen.insert(repo.name.as_str()) {
                errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("duplicate repository name '{}'", repo.name),
                });
            }

            match url::Url::parse(&repo.address) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
                Ok(url) => errors.push(ValidationError {
                    field: format!("{prefix}.address"),
                    message: format!("unsupported scheme '{}'", url.scheme()),
                }),
                Err(e) => errors.push(ValidationError {
                    field: format!("{prefix}.address"),
                    message: format!("invalid URL '{}': {e}", repo.address),
                }),
            }

            if repo.repository_id.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("{prefix}.repository_id"),
                    message: "must not be empty".into(),
                });
            }
            if repo.binding == BindingType::AtomPub {
                errors.push(ValidationError {
                    field: format!("{prefix}.binding"),
                    message: "the atompub binding is not supported; use browser".into(),
                });
            }
            if repo.connect_timeout_ms == 0 {
                errors.push(ValidationError {
                    field: format!("{prefix}.connect_timeout_ms"),
                    message: "must be greater than 0".into(),
                });
            }
            if repo.read_timeout_ms == 0 {
                errors.push(ValidationError {
                    field: format!("{prefix}.read_timeout_ms"),
                    message: "must be greater than 0".into(),
                });
            }
            if repo.poll_interval_secs == 0 {
                errors.push(ValidationError {
                    field: format!("{prefix}.poll_interval_secs"),
                    message: "must be greater than 0".into(),
                });
            }
            if repo.local_path.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: format!("{prefix}.local_path"),
                    message: "must not be empty".into(),
                });
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use reposync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .reconnect_interval_secs(10)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- connection ---

    pub fn reconnect_interval_secs(mut self, seconds: u64) -> Self {
        self.config.connection.reconnect_interval_secs = seconds;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.connection.user_agent = user_agent.into();
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_file(mut self, file: PathBuf) -> Self {
        self.config.logging.file = Some(file);
        self
    }

    // --- storage ---

    pub fn data_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.data_dir = dir;
        self
    }

    // --- repositories ---

    pub fn repository(mut self, repo: RepoInfo) -> Self {
        self.config.repositories.push(repo);
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
