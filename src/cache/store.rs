//! Fast Tier Module
//!
//! In-process cache engine combining HashMap storage with LRU tracking, TTL
//! expiry and an approximate byte budget.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::key::format_remaining_ttl;
use crate::cache::{CacheEntry, LruTracker};

// == Cache Item Info ==
/// Listing row for monitoring consumers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheItemInfo {
    pub key: String,
    pub size: usize,
    /// `"Expired"` or `"<seconds>s"`
    pub remaining_ttl: String,
}

// == Fast Tier ==
/// Bounded process-local store.
///
/// Invariants: `len() <= max_items` and `size_bytes() <= max_bytes`. Both
/// counters are maintained on every insert, remove and eviction.
#[derive(Debug)]
pub struct FastTier<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// LRU access tracker
    lru: LruTracker,
    /// Sum of entry sizes
    size_bytes: usize,
    max_items: usize,
    max_bytes: usize,
}

impl<V> FastTier<V> {
    // == Constructor ==
    /// Creates a new FastTier with the given limits.
    ///
    /// # Arguments
    /// * `max_items` - Maximum number of entries
    /// * `max_bytes` - Maximum sum of approximate entry sizes
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            size_bytes: 0,
            max_items,
            max_bytes,
        }
    }

    // == Insert ==
    /// Stores a value, replacing any existing entry and resetting its TTL.
    ///
    /// Evicts least recently used entries until the new entry fits. Returns the
    /// number of evicted entries. An entry larger than `max_bytes` on its own is
    /// not admitted.
    pub fn insert(
        &mut self,
        key: String,
        value: V,
        ttl: Duration,
        size: usize,
        now: Instant,
    ) -> usize {
        self.remove(&key);

        if size > self.max_bytes || self.max_items == 0 {
            warn!(
                key = %key,
                size,
                max_bytes = self.max_bytes,
                "Entry too large for fast tier, not stored"
            );
            return 0;
        }

        let mut evicted = 0;
        while self.entries.len() >= self.max_items || self.size_bytes + size > self.max_bytes {
            match self.lru.evict_oldest() {
                Some(oldest) => {
                    if let Some(entry) = self.entries.remove(&oldest) {
                        self.size_bytes -= entry.size;
                        evicted += 1;
                        debug!(key = %oldest, "Evicted least recently used entry");
                    }
                }
                None => break,
            }
        }

        self.entries
            .insert(key.clone(), CacheEntry::new(value, ttl, size, now));
        self.size_bytes += size;
        self.lru.touch(&key);

        evicted
    }

    // == Get ==
    /// Returns a live entry's value and marks it recently used.
    ///
    /// Expired entries are a miss but stay in place for [`peek`](Self::peek).
    pub fn get(&mut self, key: &str, now: Instant) -> Option<&V> {
        let entry = self.entries.get_mut(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.last_accessed_at = now;
        self.lru.touch(key);
        Some(&entry.value)
    }

    // == Peek ==
    /// Returns a value regardless of expiry without touching recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// True if the key holds an unexpired entry. Does not touch recency.
    pub fn contains_live(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    // == Remove ==
    /// Removes an entry by key. Returns whether an entry was found.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.size_bytes -= entry.size;
                self.lru.remove(key);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.size_bytes = 0;
    }

    // == Purge Expired ==
    /// Removes entries that have been expired for longer than `grace`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self, now: Instant, grace: Duration) -> usize {
        let stale_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now) && entry.expired_for(now) >= grace)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale_keys {
            self.remove(key);
        }
        stale_keys.len()
    }

    // == Items ==
    /// Lists entries sorted by key.
    pub fn items(&self, now: Instant) -> Vec<CacheItemInfo> {
        let mut items: Vec<CacheItemInfo> = self
            .entries
            .iter()
            .map(|(key, entry)| CacheItemInfo {
                key: key.clone(),
                size: entry.size,
                remaining_ttl: format_remaining_ttl(entry.remaining_ttl(now)),
            })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        items
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}
