//! Connection supervision
//!
//! - [`scheduler`] - Opens sessions, backs off after permission errors
//! - [`interrupted`] - Feeds connection failures back as events
//! - [`blocked_until`] - Parsing of "retry not before" hints

pub mod blocked_until;
pub mod interrupted;
pub mod scheduler;

pub use blocked_until::parse_blocked_until;
pub use interrupted::ConnectionInterruptedHandler;
pub use scheduler::{ConnectionScheduler, DEFAULT_INTERVAL};
