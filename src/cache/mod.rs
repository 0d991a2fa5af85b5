//! Concurrent response cache with streaming entries and TTL eviction.

pub mod entry;
mod evictor;
pub mod store;


pub use entry::CacheEntry;
pub use store::{Admission, Cache, CacheError, DeleteOutcome};
