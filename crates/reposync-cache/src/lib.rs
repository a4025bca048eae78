//! RepoSync Cache - Local state persistence
//!
//! SQLite-based storage for one repository:
//! - Mapped objects (remote id to local name and parent)
//! - Change-log token
//! - Selectively ignored folders
//! - In-flight file transmissions
//! - Session cookies
//!
//! ## Architecture
//!
//! This crate implements the storage ports and the authentication provider
//! port from `reposync-core`. It is a driven (secondary) adapter in the
//! hexagonal architecture. Every repository gets its own database file, so
//! no table carries a repository column.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteMetaDataStorage`] - `IMetaDataStorage`
//! - [`SqliteIgnoredEntitiesStorage`] - `IIgnoredEntitiesStorage`
//! - [`SqliteFileTransmissionStorage`] - `IFileTransmissionStorage`
//! - [`SqliteCookieStorage`] - `IAuthenticationProvider`
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use reposync_cache::{DatabasePool, SqliteMetaDataStorage};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/reposync/docs.db")).await?;
//! let metadata = SqliteMetaDataStorage::new(pool.pool().clone());
//! // Use metadata as IMetaDataStorage...
//! # Ok(())
//! # }
//! ```

pub mod cookies;
pub mod ignored;
pub mod metadata;
pub mod pool;
mod rows;
pub mod transmissions;

pub use cookies::SqliteCookieStorage;
pub use ignored::SqliteIgnoredEntitiesStorage;
pub use metadata::SqliteMetaDataStorage;
pub use pool::DatabasePool;
pub use transmissions::SqliteFileTransmissionStorage;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be turned back into a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
