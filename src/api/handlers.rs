//! API Handlers
//!
//! HTTP request handlers for the cached proxy and the cache admin endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;
use tracing::debug;

use crate::cache::{cache_key, CacheManager};
use crate::config::Config;
use crate::error::{AppError, FetchError};
use crate::limiter::{ExecuteOptions, RateLimiter};
use crate::models::{ClearResponse, DeleteResponse, HealthResponse, ItemsResponse, StatsResponse};
use crate::persistent::PersistentTier;
use crate::upstream::UpstreamClient;

/// Application state shared across all handlers.
///
/// Every field is a cheap handle; cloning the state shares the cache, the
/// limiter and the upstream connection pool.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheManager<Value>,
    pub limiter: Arc<RateLimiter>,
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Creates a new AppState; the limiter is the one `upstream` runs through.
    pub fn new(cache: CacheManager<Value>, upstream: UpstreamClient) -> Self {
        Self {
            cache,
            limiter: upstream.limiter().clone(),
            upstream,
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// # Arguments
    /// * `config` - Service configuration
    /// * `persistent` - Persistent tier chosen by the caller
    pub fn from_config(config: &Config, persistent: PersistentTier) -> Result<Self, FetchError> {
        let limiter = Arc::new(RateLimiter::new(config.limiter_config()));
        let upstream = UpstreamClient::new(
            config.upstream_base_url.clone(),
            Duration::from_secs(config.request_timeout),
            limiter,
        )?;
        let cache = CacheManager::new(config.cache_config(), persistent);
        Ok(Self::new(cache, upstream))
    }
}

/// Handler for GET /api/*path
///
/// Serves the upstream resource from cache, fetching it through the limiter
/// on a miss. Concurrent requests for the same resource share one fetch.
pub async fn proxy_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let path = path.trim_matches('/').to_string();
    if path.is_empty() {
        return Err(AppError::InvalidRequest("upstream path is empty".to_string()));
    }

    let key = cache_key(&path, &params);
    debug!(key = %key, "Proxy request");

    let upstream = state.upstream.clone();
    let query: Vec<(String, String)> = params.into_iter().collect();
    let value = state
        .cache
        .dedupe_request(
            &key,
            move || async move {
                upstream
                    .fetch_json(&path, &query, ExecuteOptions::default())
                    .await
            },
            None,
        )
        .await?;

    Ok(Json(value))
}

/// Handler for GET /stats
///
/// Returns cache and limiter snapshots.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        cache: state.cache.get_stats().await,
        limiter: state.limiter.get_stats(),
    })
}

/// Handler for GET /cache/items
pub async fn items_handler(State(state): State<AppState>) -> Json<ItemsResponse> {
    Json(ItemsResponse::new(state.cache.get_cache_items().await))
}

/// Handler for DELETE /cache/:key
///
/// Removes the key from both tiers.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<DeleteResponse> {
    let deleted = state.cache.delete(&key).await;
    Json(DeleteResponse::new(key, deleted))
}

/// Handler for POST /cache/clear
///
/// Resets the fast tier and statistics. The persistent tier is left alone.
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.cache.clear().await;
    Json(ClearResponse::cleared())
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::from_config(&Config::default(), PersistentTier::disabled()).unwrap()
    }

    #[tokio::test]
    async fn test_state_shares_limiter_with_upstream() {
        let state = state();
        assert!(Arc::ptr_eq(&state.limiter, state.upstream.limiter()));
    }

    #[tokio::test]
    async fn test_delete_handler_reports_presence() {
        let state = state();
        state
            .cache
            .set("coins:page:1", serde_json::json!(["bitcoin"]), None)
            .await;

        let Json(first) = delete_handler(State(state.clone()), Path("coins:page:1".to_string())).await;
        assert!(first.deleted);

        let Json(second) = delete_handler(State(state), Path("coins:page:1".to_string())).await;
        assert!(!second.deleted);
    }

    #[tokio::test]
    async fn test_stats_handler_reflects_cache() {
        let state = state();
        state.cache.set("k", serde_json::json!(1), None).await;
        state.cache.get("k").await;

        let Json(stats) = stats_handler(State(state)).await;
        assert_eq!(stats.cache.hits, 1);
        assert_eq!(stats.cache.item_count, 1);
        assert_eq!(stats.limiter.max_concurrent, 10);
    }

    #[tokio::test]
    async fn test_proxy_rejects_empty_path() {
        let result = proxy_handler(
            State(state()),
            Path("/".to_string()),
            Query(BTreeMap::new()),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }
}
