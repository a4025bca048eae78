//! Domain types
//!
//! This module contains the core domain types for RepoSync:
//! - Newtypes for type-safe identifiers and validated values
//! - Repository connection settings
//! - Mapped object records linking local entries to remote objects
//! - Domain-specific error types

pub mod errors;
pub mod mapped_object;
pub mod newtypes;
pub mod repo_info;

// Re-export commonly used types
pub use errors::{CmisError, DomainError};
pub use mapped_object::{MappedObject, MappedObjectType};
pub use newtypes::*;
pub use repo_info::{session_keys, AuthenticationType, BindingType, RepoInfo};
