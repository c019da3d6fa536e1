//! Configuration Module
//!
//! Handles loading and managing service configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::limiter::RetryPolicy;

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the fast tier can hold
    pub max_items: usize,
    /// Approximate byte budget of the fast tier
    pub max_bytes: usize,
    /// Default TTL in milliseconds for entries without explicit TTL
    pub default_ttl_ms: u64,
    /// Seconds an expired entry is kept around as stale fallback
    pub stale_retention: u64,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Persistent tier location, None = in-process store
    pub redis_url: Option<String>,
    /// Base URL of the proxied upstream API
    pub upstream_base_url: String,
    /// Limiter slots
    pub max_concurrency: usize,
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Per-request HTTP timeout in seconds
    pub request_timeout: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ITEMS` - Fast-tier item cap (default: 500)
    /// - `MAX_BYTES` - Fast-tier byte cap (default: 50 MiB)
    /// - `DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 300000)
    /// - `STALE_RETENTION_SECS` - Stale retention in seconds (default: 3600)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 60)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `REDIS_URL` - Persistent tier URL (default: unset)
    /// - `UPSTREAM_BASE_URL` - Proxied API (default: CoinGecko v3)
    /// - `MAX_CONCURRENCY` - Limiter slots (default: 10)
    /// - `MAX_RETRIES` - Retry budget (default: 3)
    /// - `RETRY_BASE_DELAY_MS` / `RETRY_MAX_DELAY_MS` - Backoff bounds (default: 1000 / 30000)
    /// - `REQUEST_TIMEOUT_SECS` - HTTP timeout (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_items: env_or("MAX_ITEMS", defaults.max_items),
            max_bytes: env_or("MAX_BYTES", defaults.max_bytes),
            default_ttl_ms: env_or("DEFAULT_TTL_MS", defaults.default_ttl_ms),
            stale_retention: env_or("STALE_RETENTION_SECS", defaults.stale_retention),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            upstream_base_url: env::var("UPSTREAM_BASE_URL")
                .unwrap_or(defaults.upstream_base_url),
            max_concurrency: env_or("MAX_CONCURRENCY", defaults.max_concurrency),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            request_timeout: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout),
        }
    }

    /// Fast-tier settings for the cache manager.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_items: self.max_items,
            max_bytes: self.max_bytes,
            default_ttl: Duration::from_millis(self.default_ttl_ms),
        }
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            max_concurrency: self.max_concurrency,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                ..RetryPolicy::default()
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_items: 500,
            max_bytes: 50 * 1024 * 1024,
            default_ttl_ms: 300_000,
            stale_retention: 3600,
            cleanup_interval: 60,
            server_port: 3000,
            redis_url: None,
            upstream_base_url: "https://api.coingecko.com/api/v3".to_string(),
            max_concurrency: 10,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            request_timeout: 10,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// == Cache Config ==
/// Limits and default TTL for a [`CacheManager`](crate::cache::CacheManager).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_items: usize,
    pub max_bytes: usize,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Config::default().cache_config()
    }
}

// == Limiter Config ==
/// Concurrency gate size and retry policy for a [`RateLimiter`](crate::limiter::RateLimiter).
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Config::default().limiter_config()
    }
}
