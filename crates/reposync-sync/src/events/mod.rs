//! Event dispatching
//!
//! - [`queue`] - Single-consumer queue that drives the manager
//! - [`manager`] - Prioritized handler chain
//! - [`observer`] - Observer registration with unsubscribe handles
//! - [`priorities`] - Priority table of the built-in handlers
//! - [`generic`] - Closure-backed and logging handlers

pub mod generic;
pub mod manager;
pub mod observer;
pub mod priorities;
pub mod queue;

pub use generic::{DebugLoggingHandler, GenericSyncEventHandler};
pub use manager::{ISyncEventHandler, SyncEventManager};
pub use observer::{observer_fn, IObserver, ObserverList, Subscription};
pub use queue::{ISyncEventQueue, SyncEventQueue};
