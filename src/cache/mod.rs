//! Cache Module
//!
//! Tiered read-through cache: a bounded in-process fast tier with TTL and LRU
//! eviction in front of a best-effort persistent tier, plus request coalescing.

mod dedupe;
mod entry;
mod key;
mod lru;
mod manager;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use dedupe::{WarmItem, WarmSummary};
pub use entry::{encode_value, CacheEntry, FALLBACK_ENTRY_SIZE};
pub use key::{cache_key, format_bytes, format_hit_rate, format_remaining_ttl};
pub use lru::LruTracker;
pub use manager::CacheManager;
pub use stats::{CacheStats, CacheStatsSnapshot, TierUsage};
pub use store::{CacheItemInfo, FastTier};
