//! Error types for the cache and limiter
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Fetch Error Enum ==
/// Error produced by fetchers, the rate limiter and the upstream HTTP wrapper.
///
/// Cloneable so every caller joined on a coalesced fetch observes the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream answered 429. Never retried internally.
    #[error("Rate limited by upstream (status {status})")]
    RateLimited {
        status: u16,
        /// Retry-After hint in seconds, when the upstream sent one
        retry_after: Option<u64>,
    },

    /// Upstream answered with a non-success status
    #[error("Upstream returned status {status}: {message}")]
    Http {
        status: u16,
        message: String,
        skip_retry: bool,
    },

    /// Transport failure with no HTTP status (connection reset, timeout, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Failure the caller explicitly flagged as terminal
    #[error("{0}")]
    NonRetryable(String),

    /// Caller cancelled the operation
    #[error("Request cancelled")]
    Cancelled,

    /// Task was dropped from the limiter queue before it started
    #[error("Request dropped from queue")]
    QueueCleared,

    /// Limiter has been closed
    #[error("Rate limiter closed")]
    LimiterClosed,
}

impl FetchError {
    /// Builds a 429 error, the type callers match on for "wait N seconds" messaging.
    pub fn rate_limited(retry_after: Option<u64>) -> Self {
        FetchError::RateLimited {
            status: 429,
            retry_after,
        }
    }

    /// Builds a tagged HTTP error. 404 is flagged as skip-retry.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        FetchError::Http {
            status,
            message: message.into(),
            skip_retry: status == 404,
        }
    }

    // == Status ==
    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::RateLimited { status, .. } | FetchError::Http { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Retry-After hint in seconds.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// True when the error carries an explicit "do not retry" flag.
    pub fn skip_retry(&self) -> bool {
        match self {
            FetchError::Http { skip_retry, .. } => *skip_retry,
            FetchError::NonRetryable(_)
            | FetchError::Decode(_)
            | FetchError::Cancelled
            | FetchError::QueueCleared
            | FetchError::LimiterClosed => true,
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    /// Whether the limiter's retry policy would try again after this error.
    pub fn is_retryable(&self) -> bool {
        crate::limiter::should_retry(self)
    }
}

// == Store Error Enum ==
/// Failure talking to the persistent tier. Never surfaced past the cache manager.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store is not configured or its probe failed
    #[error("Persistent store unavailable")]
    Unavailable,

    /// Backend reported an error
    #[error("Persistent store error: {0}")]
    Backend(String),

    /// Value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// == App Error Enum ==
/// Error type for the HTTP surface.
#[derive(Error, Debug)]
pub enum AppError {
    /// Upstream fetch failed and no stale data was available
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, retry_after) = match &self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, None),
            AppError::Fetch(err) => match err {
                FetchError::RateLimited { retry_after, .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, *retry_after)
                }
                FetchError::Http { status: 404, .. } => (StatusCode::NOT_FOUND, None),
                FetchError::Cancelled
                | FetchError::QueueCleared
                | FetchError::LimiterClosed => (StatusCode::SERVICE_UNAVAILABLE, None),
                _ => (StatusCode::BAD_GATEWAY, None),
            },
        };

        let body = Json(json!({
            "error": message,
            "retry_after": retry_after,
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// == Result Type Alias ==
/// Convenience Result type for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
