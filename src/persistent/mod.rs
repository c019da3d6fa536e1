//! Persistent Tier Module
//!
//! Best-effort adapter over an external key/value store shared with other
//! processes. Every failure is downgraded to "miss" or "no-op".

mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::StoreError;

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

// == Persistent Store Trait ==
/// Operations the cache needs from an external store.
///
/// Values are opaque strings; TTLs are in the store's native unit (seconds).
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Keys matching a glob pattern (`*` wildcard).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn dbsize(&self) -> Result<u64, StoreError>;

    /// Availability probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

const UNKNOWN: u8 = 0;
const AVAILABLE: u8 = 1;
const UNAVAILABLE: u8 = 2;

// == Persistent Tier ==
/// Availability-aware wrapper the cache manager talks to.
///
/// Availability is probed once, lazily, and cached in the instance until
/// [`recheck`](Self::recheck) is called.
pub struct PersistentTier {
    store: Option<Arc<dyn PersistentStore>>,
    availability: AtomicU8,
}

impl PersistentTier {
    /// Wraps a store. Availability is probed on first use.
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            store: Some(store),
            availability: AtomicU8::new(UNKNOWN),
        }
    }

    /// A tier with no backing store; every lookup is a miss.
    pub fn disabled() -> Self {
        Self {
            store: None,
            availability: AtomicU8::new(UNAVAILABLE),
        }
    }

    // == Availability ==
    /// Returns the cached availability, probing on first call.
    pub async fn is_available(&self) -> bool {
        match self.availability.load(Ordering::Acquire) {
            AVAILABLE => true,
            UNAVAILABLE => false,
            _ => self.recheck().await,
        }
    }

    /// Cached availability without probing. False until a probe has succeeded.
    pub fn is_known_available(&self) -> bool {
        self.availability.load(Ordering::Acquire) == AVAILABLE
    }

    /// Probes the store again and caches the result.
    pub async fn recheck(&self) -> bool {
        let available = match &self.store {
            Some(store) => match store.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Persistent tier probe failed, running fast tier only");
                    false
                }
            },
            None => false,
        };

        let state = if available { AVAILABLE } else { UNAVAILABLE };
        let previous = self.availability.swap(state, Ordering::AcqRel);
        if available && previous != AVAILABLE {
            info!("Persistent tier available");
        }
        available
    }

    async fn store(&self) -> Option<&Arc<dyn PersistentStore>> {
        if self.is_available().await {
            self.store.as_ref()
        } else {
            None
        }
    }

    // == Get ==
    /// Raw value for a key. Failures count as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        let store = self.store().await?;
        match store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent tier get failed");
                None
            }
        }
    }

    // == Set ==
    /// Best-effort write; TTL converted to whole seconds, rounded up.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let Some(store) = self.store().await else {
            return;
        };
        let ttl_seconds = ttl_to_seconds(ttl);
        match store.set(key, value, ttl_seconds).await {
            Ok(()) => debug!(key = %key, ttl_seconds, "Wrote entry to persistent tier"),
            Err(e) => warn!(key = %key, error = %e, "Persistent tier set failed"),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(store) = self.store().await else {
            return false;
        };
        match store.exists(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent tier exists failed");
                false
            }
        }
    }

    pub async fn del(&self, key: &str) {
        let Some(store) = self.store().await else {
            return;
        };
        if let Err(e) = store.del(key).await {
            warn!(key = %key, error = %e, "Persistent tier delete failed");
        }
    }

    /// Key count, None when unreachable.
    pub async fn dbsize(&self) -> Option<u64> {
        let store = self.store().await?;
        match store.dbsize().await {
            Ok(size) => Some(size),
            Err(e) => {
                warn!(error = %e, "Persistent tier dbsize failed");
                None
            }
        }
    }

    // == Clear ==
    /// Deletes every key in the store. Returns how many were removed.
    ///
    /// The store is shared with other processes; only call this where that is
    /// acceptable.
    pub async fn clear_all(&self) -> usize {
        let Some(store) = self.store().await else {
            return 0;
        };
        let keys = match store.keys("*").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Persistent tier keys failed");
                return 0;
            }
        };

        let mut removed = 0;
        for key in &keys {
            match store.del(key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "Persistent tier delete failed"),
            }
        }
        removed
    }
}

impl std::fmt::Debug for PersistentTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTier")
            .field("configured", &self.store.is_some())
            .field("available", &self.is_known_available())
            .finish()
    }
}

/// Milliseconds to seconds, rounded up, never zero.
pub fn ttl_to_seconds(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).div_ceil(1000).max(1)
}
