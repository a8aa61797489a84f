//! Bounded-capacity frame cache.
//!
//! - [`lru`]: the LRU store, its keys, and its telemetry snapshot

pub mod lru;

pub use lru::{CacheKey, CacheStats, CachedTile, FrameCache};
