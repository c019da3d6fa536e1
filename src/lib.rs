//! Upstream Cache - tiered read-through cache for a rate-limited HTTP API
//!
//! Fast in-process tier backed by a best-effort persistent tier, request
//! coalescing with stale fallback, and a bounded-concurrency limiter with
//! retry and backoff.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;
pub mod models;
pub mod persistent;
pub mod tasks;
pub mod upstream;

pub use api::AppState;
pub use cache::CacheManager;
pub use config::Config;
pub use error::{AppError, FetchError, StoreError};
pub use limiter::RateLimiter;
pub use tasks::spawn_cleanup_task;
pub use upstream::UpstreamClient;
