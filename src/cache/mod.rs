//! File handle caching layer
//!
//! Sits between the query orchestrator and the remote file service and
//! deduplicates handle resolution calls within a TTL window.

pub mod clock;
pub mod handles;

pub use clock::{Clock, MonotonicClock};
pub use handles::{CacheStats, HandleCache, DEFAULT_TTL};
