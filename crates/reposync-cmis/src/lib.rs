//! RepoSync CMIS - browser-binding repository adapter
//!
//! Implements the session ports of `reposync-core` against a CMIS 1.1
//! server speaking the JSON browser binding:
//! - Login and repository discovery from the service document
//! - Capability detection (change log, selective ignore)
//! - Object reads, child listings and content-change paging
//! - Folder and document creation, content updates, move, rename, delete
//! - Cookie reuse through an `IAuthenticationProvider`
//!
//! ## Modules
//!
//! - [`factory`] - [`CmisSessionFactory`], the `ISessionFactory`
//! - [`session`] - [`CmisSession`], the `ISession`

mod client;
mod cookies;
mod errors;
pub mod factory;
mod model;
pub mod session;

pub use factory::CmisSessionFactory;
pub use session::CmisSession;
