//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync handlers
//! depend on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ISessionFactory`] / [`ISession`] - Remote repository access
//! - [`IMetaDataStorage`] - Mapped objects and change-log position
//! - [`IIgnoredEntitiesStorage`] - Selectively ignored folders
//! - [`IFileTransmissionStorage`] - In-flight uploads and downloads
//! - [`IAuthenticationProvider`] - Cookie persistence between sessions

pub mod auth;
pub mod session;
pub mod storage;

pub use auth::{IAuthenticationProvider, StoredCookie};
pub use session::{
    sync_operation_context, ChangeLogEntry, ChangeLogPage, ISession, ISessionFactory,
    OperationContext, RemoteChangeType, RemoteObject, RepositoryCapabilities, SessionParameters,
};
pub use storage::{
    FileTransmission, IFileTransmissionStorage, IIgnoredEntitiesStorage, IMetaDataStorage,
    IgnoredEntity,
};
