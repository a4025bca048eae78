//! RepoSync Core - Domain types, events and ports
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `RepoInfo`, `MappedObject`, validated newtypes, error taxonomy
//! - **Events** - `SyncEvent` and the change/transmission payloads it carries
//! - **Port definitions** - Traits for adapters: `ISessionFactory`, `ISession`,
//!   `IMetaDataStorage`, `IIgnoredEntitiesStorage`, `IFileTransmissionStorage`,
//!   `IAuthenticationProvider`
//! - **Configuration** - YAML configuration with validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure types with no I/O.
//! Ports define trait interfaces that adapter crates implement.
//! The event pipeline that drives them lives in `reposync-sync`.

pub mod config;
pub mod domain;
pub mod events;
pub mod ports;
