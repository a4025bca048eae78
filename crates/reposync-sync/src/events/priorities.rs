//! Handler priorities
//!
//! Higher values run first. Handlers with equal priority run in the order
//! they were registered.

pub const DEBUG: i32 = 100_000;
pub const REPORTING: i32 = 50_000;
pub const SELECTIVE_IGNORE_TRANSFORMER: i32 = 10_500;
pub const FILTER: i32 = 10_000;
pub const DELAY_RETRY: i32 = 9_000;
pub const INITIALIZER: i32 = 8_000;
pub const CONNECTION_SCHEDULER: i32 = 7_000;
pub const CONTENT_CHANGES: i32 = 6_000;
pub const CRAWLER: i32 = 5_000;
pub const REMOTE_OBJECT_FETCHER: i32 = 4_000;
pub const MOVE_ACCUMULATOR: i32 = 3_000;
pub const SYNC_MECHANISM: i32 = 1_000;
pub const GENERIC: i32 = 0;
