//! Limiter Module
//!
//! Bounds concurrent upstream calls and retries the ones that fail
//! transiently.

mod gate;
mod retry;

pub use gate::{ExecuteOptions, LimiterStats, LimiterStatus, RateLimiter, WINDOW};
pub use retry::{retry, should_retry, RetryPolicy};
