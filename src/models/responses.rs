//! Response DTOs for the cache service API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheItemInfo, CacheStatsSnapshot};
use crate::limiter::LimiterStats;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStatsSnapshot,
    pub limiter: LimiterStats,
}

/// Response body for the item listing (GET /cache/items)
#[derive(Debug, Clone, Serialize)]
pub struct ItemsResponse {
    pub count: usize,
    pub items: Vec<CacheItemInfo>,
}

impl ItemsResponse {
    pub fn new(items: Vec<CacheItemInfo>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// Response body for the DELETE operation (DELETE /cache/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// The key that was targeted
    pub key: String,
    /// Whether the fast tier held the key
    pub deleted: bool,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, deleted: bool) -> Self {
        Self {
            key: key.into(),
            deleted,
        }
    }
}

/// Response body for POST /cache/clear
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
}

impl ClearResponse {
    pub fn cleared() -> Self {
        Self {
            message: "Fast tier and statistics cleared".to_string(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
