//! Tiered Cache Manager
//!
//! Read-through cache over a fast in-process tier and a best-effort
//! persistent tier. One instance is meant to live for the whole process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::entry::encode_value;
use crate::cache::{CacheItemInfo, CacheStats, CacheStatsSnapshot, FastTier, TierUsage};
use crate::config::CacheConfig;
use crate::error::FetchError;
use crate::persistent::PersistentTier;

/// A fetch in flight, joinable by any number of callers.
pub(crate) type PendingFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

/// A registered fetch and the id it was registered under.
pub(crate) struct PendingSlot<V> {
    pub(crate) id: u64,
    pub(crate) fetch: PendingFetch<V>,
}

/// Everything guarded by the manager's single mutex.
pub(crate) struct State<V> {
    pub(crate) tier: FastTier<V>,
    pub(crate) stats: CacheStats,
    /// At most one entry per key
    pub(crate) pending: HashMap<String, PendingSlot<V>>,
    pub(crate) next_fetch_id: u64,
}

pub(crate) struct Inner<V> {
    pub(crate) state: Mutex<State<V>>,
    pub(crate) persistent: PersistentTier,
    pub(crate) default_ttl: Duration,
}

// == Cache Manager ==
/// Tiered read-through cache with request coalescing.
///
/// Cloning is cheap and every clone shares the same tiers, stats and
/// pending-request table.
pub struct CacheManager<V> {
    pub(crate) inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheManager<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a manager over the given persistent tier.
    ///
    /// # Arguments
    /// * `config` - Fast-tier limits and default TTL
    /// * `persistent` - Persistent tier, or [`PersistentTier::disabled`]
    pub fn new(config: CacheConfig, persistent: PersistentTier) -> Self {
        info!(
            max_items = config.max_items,
            max_bytes = config.max_bytes,
            default_ttl_ms = config.default_ttl.as_millis() as u64,
            "Cache manager initialized"
        );
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    tier: FastTier::new(config.max_items, config.max_bytes),
                    stats: CacheStats::new(),
                    pending: HashMap::new(),
                    next_fetch_id: 0,
                }),
                persistent,
                default_ttl: config.default_ttl,
            }),
        }
    }

    // == Get ==
    /// Looks a key up in the fast tier, then the persistent tier.
    ///
    /// A persistent hit repopulates the fast tier with the default TTL.
    /// Absence is `None`; persistent-tier failures count as a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let mut state = self.inner.state.lock().await;
            if let Some(value) = state.tier.get(key, Instant::now()).cloned() {
                state.stats.record_fast_tier_hit();
                return Some(value);
            }
        }

        let found = self.lookup_persistent(key).await;
        if found.is_none() {
            self.inner.state.lock().await.stats.record_miss();
        }
        found
    }

    /// Persistent-tier half of a lookup. Records tier hit/miss, not the overall miss.
    pub(crate) async fn lookup_persistent(&self, key: &str) -> Option<V> {
        let persistent = &self.inner.persistent;
        if !persistent.is_available().await {
            return None;
        }

        let decoded = persistent.get(key).await.and_then(|raw| {
            serde_json::from_str::<V>(&raw)
                .map_err(|e| warn!(key = %key, error = %e, "Discarding undecodable persistent entry"))
                .ok()
                .map(|value| (value, raw.len()))
        });

        let mut state = self.inner.state.lock().await;
        let now = Instant::now();
        // A local write may have landed during the round trip; it wins.
        if let Some(value) = state.tier.get(key, now).cloned() {
            state.stats.record_fast_tier_hit();
            return Some(value);
        }

        match decoded {
            Some((value, size)) => {
                let evicted = state.tier.insert(
                    key.to_string(),
                    value.clone(),
                    self.inner.default_ttl,
                    size,
                    now,
                );
                state.stats.record_evictions(evicted);
                state.stats.record_persistent_tier_hit();
                debug!(key = %key, "Repopulated fast tier from persistent tier");
                Some(value)
            }
            None => {
                state.stats.record_persistent_tier_miss();
                None
            }
        }
    }

    // == Set ==
    /// Stores a value in the fast tier and, best-effort, in the persistent tier.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `ttl` - Lifetime, default TTL when None
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.inner.default_ttl);
        let (encoded, size) = encode_value(&value);

        {
            let mut state = self.inner.state.lock().await;
            let evicted = state
                .tier
                .insert(key.to_string(), value, ttl, size, Instant::now());
            state.stats.record_evictions(evicted);
        }

        match encoded {
            Some(encoded) => self.inner.persistent.set(key, &encoded, ttl).await,
            None => warn!(key = %key, "Value not serializable, kept in fast tier only"),
        }
    }

    // == Has ==
    /// True if an unexpired entry exists in either tier. Does not touch stats.
    pub async fn has(&self, key: &str) -> bool {
        if self
            .inner
            .state
            .lock()
            .await
            .tier
            .contains_live(key, Instant::now())
        {
            return true;
        }
        self.inner.persistent.exists(key).await
    }

    // == Delete ==
    /// Removes a key from both tiers. Returns whether the fast tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let found = self.inner.state.lock().await.tier.remove(key);
        self.inner.persistent.del(key).await;
        found
    }

    // == Get Stale ==
    /// Returns a value even if expired, without touching stats or recency.
    ///
    /// Only meant as a fallback when a fetch fails.
    pub async fn get_stale(&self, key: &str) -> Option<V> {
        if let Some(value) = self.inner.state.lock().await.tier.peek(key).cloned() {
            return Some(value);
        }

        let raw = self.inner.persistent.get(key).await?;
        serde_json::from_str(&raw).ok()
    }

    // == Clear ==
    /// Resets the fast tier and the stats. The persistent tier is left alone.
    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        state.tier.clear();
        state.stats.reset();
        info!("Fast tier and stats cleared");
    }

    /// Deletes every key from the persistent tier.
    ///
    /// The store may be shared with other processes; intended for dev and
    /// single-tenant setups.
    pub async fn clear_persistent(&self) -> usize {
        let removed = self.inner.persistent.clear_all().await;
        warn!(removed, "Persistent tier cleared");
        removed
    }

    // == Stats ==
    /// Read-only snapshot of counters and fast-tier usage.
    pub async fn get_stats(&self) -> CacheStatsSnapshot {
        let (stats, usage) = {
            let state = self.inner.state.lock().await;
            let usage = TierUsage {
                item_count: state.tier.len(),
                size_bytes: state.tier.size_bytes(),
                max_items: state.tier.max_items(),
                max_bytes: state.tier.max_bytes(),
                pending_requests: state.pending.len(),
            };
            (state.stats.clone(), usage)
        };

        let available = self.inner.persistent.is_available().await;
        let keys = if available {
            self.inner.persistent.dbsize().await
        } else {
            None
        };
        CacheStatsSnapshot::new(&stats, usage, available, keys)
    }

    /// Fast-tier entries sorted by key.
    pub async fn get_cache_items(&self) -> Vec<CacheItemInfo> {
        self.inner.state.lock().await.tier.items(Instant::now())
    }

    // == Purge Expired ==
    /// Drops fast-tier entries that have been expired for at least `grace`.
    pub async fn purge_expired(&self, grace: Duration) -> usize {
        self.inner
            .state
            .lock()
            .await
            .tier
            .purge_expired(Instant::now(), grace)
    }

    /// Fetches currently registered for coalescing.
    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    // == Close ==
    /// Releases the fast tier and forgets in-flight fetches.
    ///
    /// Fetch tasks already running still finish; their callers get their result.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        let dropped = state.pending.len();
        state.tier.clear();
        state.pending.clear();
        info!(pending = dropped, "Cache manager closed");
    }
}

impl<V> std::fmt::Debug for CacheManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("persistent", &self.inner.persistent)
            .field("default_ttl", &self.inner.default_ttl)
            .finish()
    }
}
