//! Request coalescing and cache warming.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::manager::PendingSlot;
use crate::cache::CacheManager;
use crate::error::FetchError;

type BoxedFetcher<V> = Box<dyn FnOnce() -> BoxFuture<'static, Result<V, FetchError>> + Send>;

// == Warm Item ==
/// One key to pre-populate.
pub struct WarmItem<V> {
    pub key: String,
    pub ttl: Option<Duration>,
    fetcher: BoxedFetcher<V>,
}

impl<V> WarmItem<V> {
    pub fn new<F, Fut>(key: impl Into<String>, fetcher: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            ttl: None,
            fetcher: Box::new(move || fetcher().boxed()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Outcome counts of a [`CacheManager::warm_cache`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WarmSummary {
    pub warmed: usize,
    /// Already cached, fetcher not called
    pub skipped: usize,
    pub failed: usize,
}

enum WarmOutcome {
    Warmed,
    Skipped,
    Failed,
}

impl<V> CacheManager<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    // == Dedupe Request ==
    /// Returns the cached value for `key`, or fetches it with at most one
    /// fetch in flight per key.
    ///
    /// Concurrent callers for the same key join the fetch already running and
    /// observe its result. When the fetch fails, a stale value is returned if
    /// one exists; otherwise the fetcher's error is.
    ///
    /// # Arguments
    /// * `key` - Cache key
    /// * `fetcher` - Produces the value on a miss
    /// * `ttl` - Lifetime of the fetched value, default TTL when None
    pub async fn dedupe_request<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let pending = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;

            if let Some(slot) = state.pending.get(key) {
                debug!(key = %key, "Joining in-flight fetch");
                slot.fetch.clone()
            } else if let Some(value) = state.tier.get(key, Instant::now()).cloned() {
                state.stats.record_fast_tier_hit();
                return Ok(value);
            } else {
                // Spawned while the lock is held: the task cannot clear its
                // pending slot before the slot is registered.
                let id = state.next_fetch_id;
                state.next_fetch_id += 1;

                let cache = self.clone();
                let owned_key = key.to_string();
                let task =
                    tokio::spawn(async move { cache.resolve(owned_key, id, fetcher, ttl).await });

                let pending = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(FetchError::NonRetryable(format!("fetch task failed: {e}")))
                    })
                }
                .boxed()
                .shared();
                state.pending.insert(
                    key.to_string(),
                    PendingSlot {
                        id,
                        fetch: pending.clone(),
                    },
                );
                pending
            }
        };

        pending.await
    }

    /// Body of a coalesced fetch; runs on its own task.
    ///
    /// `id` identifies this fetch's pending slot, which is only released if
    /// it still belongs to this fetch.
    async fn resolve<F, Fut>(
        self,
        key: String,
        id: u64,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let outcome = match self.lookup_persistent(&key).await {
            Some(value) => Ok(value),
            None => {
                self.inner.state.lock().await.stats.record_miss();
                match run_fetcher(fetcher).await {
                    Ok(value) => {
                        self.set(&key, value.clone(), ttl).await;
                        Ok(value)
                    }
                    Err(e) => Err(e),
                }
            }
        };

        {
            let mut state = self.inner.state.lock().await;
            if state.pending.get(&key).is_some_and(|slot| slot.id == id) {
                state.pending.remove(&key);
            }
        }

        match outcome {
            Ok(value) => Ok(value),
            Err(err) => match self.get_stale(&key).await {
                Some(stale) => {
                    warn!(key = %key, error = %err, "Fetch failed, serving stale data");
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    // == Warm Cache ==
    /// Fetches and stores every item not already cached.
    ///
    /// Items run concurrently and independently; a failing fetcher is logged
    /// and counted, never propagated.
    pub async fn warm_cache(&self, items: Vec<WarmItem<V>>) -> WarmSummary {
        let outcomes = join_all(items.into_iter().map(|item| self.warm_one(item))).await;

        let mut summary = WarmSummary::default();
        for outcome in outcomes {
            match outcome {
                WarmOutcome::Warmed => summary.warmed += 1,
                WarmOutcome::Skipped => summary.skipped += 1,
                WarmOutcome::Failed => summary.failed += 1,
            }
        }
        info!(
            warmed = summary.warmed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Cache warm-up finished"
        );
        summary
    }

    async fn warm_one(&self, item: WarmItem<V>) -> WarmOutcome {
        if self.has(&item.key).await {
            return WarmOutcome::Skipped;
        }
        match run_fetcher(item.fetcher).await {
            Ok(value) => {
                self.set(&item.key, value, item.ttl).await;
                WarmOutcome::Warmed
            }
            Err(e) => {
                warn!(key = %item.key, error = %e, "Cache warm-up fetch failed");
                WarmOutcome::Failed
            }
        }
    }
}

/// Runs a fetcher, turning a panic into a terminal error.
async fn run_fetcher<V, F, Fut>(fetcher: F) -> Result<V, FetchError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, FetchError>>,
{
    AssertUnwindSafe(async move { fetcher().await })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(FetchError::NonRetryable("fetcher panicked".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::persistent::PersistentTier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn manager() -> CacheManager<String> {
        CacheManager::new(CacheConfig::default(), PersistentTier::disabled())
    }

    #[tokio::test]
    async fn test_fetch_on_miss_stores_value() {
        let cache = manager();
        let value = cache
            .dedupe_request("k", || async { Ok("fresh".to_string()) }, None)
            .await
            .unwrap();

        assert_eq!(value, "fresh");
        assert_eq!(cache.get("k").await, Some("fresh".to_string()));
        assert_eq!(cache.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_panicking_fetcher_clears_pending_slot() {
        let cache = manager();
        let result = cache
            .dedupe_request(
                "k",
                || async {
                    if true {
                        panic!("boom");
                    }
                    Ok("never".to_string())
                },
                None,
            )
            .await;

        assert!(matches!(result, Err(FetchError::NonRetryable(_))));
        assert_eq!(cache.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_leak_pending_slot() {
        let cache = manager();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let request = cache.dedupe_request(
            "k",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok("v".to_string())
            },
            None,
        );
        // Give up on the request before the fetch finishes
        let _ = tokio::time::timeout(Duration::from_millis(1), request).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.pending_count().await, 0);
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_fetch_keeps_hands_off_newer_slot() {
        let cache = manager();
        let calls = Arc::new(AtomicUsize::new(0));

        let spawn_fetch = |delay: Duration| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .dedupe_request(
                        "k",
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(delay).await;
                            Ok("v".to_string())
                        },
                        None,
                    )
                    .await
            })
        };

        let first = spawn_fetch(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(1)).await;
        cache.close().await;

        let second = spawn_fetch(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cache.pending_count().await, 1);

        assert_eq!(first.await.unwrap(), Ok("v".to_string()));
        // The newer registration is still in flight and still joinable
        assert_eq!(cache.pending_count().await, 1);

        assert_eq!(second.await.unwrap(), Ok("v".to_string()));
        assert_eq!(cache.pending_count().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_warm_cache_skips_and_isolates_failures() {
        let cache = manager();
        cache.set("cached", "old".to_string(), None).await;

        let summary = cache
            .warm_cache(vec![
                WarmItem::new("cached", || async { Ok("new".to_string()) }),
                WarmItem::new("fresh", || async { Ok("value".to_string()) })
                    .with_ttl(Duration::from_secs(30)),
                WarmItem::new("broken", || async {
                    Err(FetchError::Network("reset".to_string()))
                }),
            ])
            .await;

        assert_eq!(
            summary,
            WarmSummary {
                warmed: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(cache.get("cached").await, Some("old".to_string()));
        assert_eq!(cache.get("fresh").await, Some("value".to_string()));
        assert_eq!(cache.get("broken").await, None);
    }
}
