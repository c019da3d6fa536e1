//! Cache Statistics Module
//!
//! Tracks cache performance metrics across both tiers.

use serde::Serialize;

use crate::cache::key::{format_bytes, format_hit_rate};

// == Cache Stats ==
/// Monotonic counters, one instance per cache manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by either tier
    pub hits: u64,
    /// Lookups answered by neither tier
    pub misses: u64,
    pub fast_tier_hits: u64,
    pub persistent_tier_hits: u64,
    /// Persistent tier consulted and did not have the key
    pub persistent_tier_misses: u64,
    /// Entries dropped by the LRU/size policy
    pub evictions: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_fast_tier_hit(&mut self) {
        self.hits += 1;
        self.fast_tier_hits += 1;
    }

    pub fn record_persistent_tier_hit(&mut self) {
        self.hits += 1;
        self.persistent_tier_hits += 1;
    }

    pub fn record_persistent_tier_miss(&mut self) {
        self.persistent_tier_misses += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// == Stats Snapshot ==
/// Read-only view handed to monitoring consumers.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Hit rate as a two-decimal percentage, e.g. `"50.00%"`
    pub hit_rate_percentage: String,
    pub fast_tier_hits: u64,
    pub persistent_tier_hits: u64,
    pub persistent_tier_misses: u64,
    pub evictions: u64,
    /// Fast tier only
    pub item_count: usize,
    /// Fast tier only
    pub size_bytes: usize,
    pub size_formatted: String,
    pub max_items: usize,
    pub max_bytes: usize,
    /// Fetches currently in flight
    pub pending_requests: usize,
    pub persistent_tier_available: bool,
    /// Key count reported by the persistent tier, when reachable
    pub persistent_tier_keys: Option<u64>,
}

/// Fast-tier figures captured alongside the counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierUsage {
    pub item_count: usize,
    pub size_bytes: usize,
    pub max_items: usize,
    pub max_bytes: usize,
    pub pending_requests: usize,
}

impl CacheStatsSnapshot {
    pub fn new(
        stats: &CacheStats,
        usage: TierUsage,
        persistent_tier_available: bool,
        persistent_tier_keys: Option<u64>,
    ) -> Self {
        let hit_rate = stats.hit_rate();
        Self {
            hits: stats.hits,
            misses: stats.misses,
            hit_rate,
            hit_rate_percentage: format_hit_rate(hit_rate),
            fast_tier_hits: stats.fast_tier_hits,
            persistent_tier_hits: stats.persistent_tier_hits,
            persistent_tier_misses: stats.persistent_tier_misses,
            evictions: stats.evictions,
            item_count: usage.item_count,
            size_bytes: usage.size_bytes,
            size_formatted: format_bytes(usage.size_bytes),
            max_items: usage.max_items,
            max_bytes: usage.max_bytes,
            pending_requests: usage.pending_requests,
            persistent_tier_available,
            persistent_tier_keys,
        }
    }
}
