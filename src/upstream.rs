//! Upstream HTTP Client
//!
//! JSON GET wrapper that runs every request through the rate limiter and
//! maps upstream failures onto [`FetchError`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::limiter::{ExecuteOptions, RateLimiter};

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 256;

// == Upstream Client ==
/// Cheap to clone; clones share the connection pool and the limiter.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl UpstreamClient {
    /// Creates a client for `base_url`.
    ///
    /// # Arguments
    /// * `base_url` - Prefix joined with every request path
    /// * `timeout` - Per-attempt request timeout
    /// * `limiter` - Gate shared by all upstream calls
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::NonRetryable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    // == Fetch JSON ==
    /// GETs `path` with `query` and decodes the body as JSON.
    ///
    /// 429 becomes [`FetchError::RateLimited`] and is never retried; 404 is
    /// flagged skip-retry; other failures follow the limiter's retry policy.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        options: ExecuteOptions,
    ) -> Result<T, FetchError> {
        let url = self.url(path);
        self.limiter
            .execute(|| self.get_once(&url, query), options)
            .await
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T, FetchError> {
        debug!(url = %url, "Upstream request");
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            warn!(url = %url, retry_after = ?retry_after, "Upstream rate limit hit");
            return Err(FetchError::rate_limited(retry_after));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(FetchError::http(status.as_u16(), error_message(status, &body)));
        }

        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("upstream error")
            .to_string();
    }
    text.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::limiter::RetryPolicy;
    use axum::{http::StatusCode as AxumStatus, response::IntoResponse, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: &str) -> UpstreamClient {
        let limiter = Arc::new(RateLimiter::new(LimiterConfig {
            max_concurrency: 2,
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
                ..RetryPolicy::default()
            },
        }));
        UpstreamClient::new(base_url, Duration::from_secs(5), limiter).unwrap()
    }

    /// Router answering `/target` with `respond(hit_number)`.
    fn counting_router<F>(hits: Arc<AtomicUsize>, respond: F) -> Router
    where
        F: Fn(usize) -> axum::response::Response + Clone + Send + Sync + 'static,
    {
        Router::new().route(
            "/target",
            get(move || {
                let hits = hits.clone();
                let respond = respond.clone();
                async move { respond(hits.fetch_add(1, Ordering::SeqCst)) }
            }),
        )
    }

    #[test]
    fn test_url_joining() {
        let client = client("http://upstream.test/api/v3/");
        assert_eq!(client.url("/coins/markets"), "http://upstream.test/api/v3/coins/markets");
        assert_eq!(client.url("ping"), "http://upstream.test/api/v3/ping");
    }

    #[tokio::test]
    async fn test_decodes_json_and_forwards_query() {
        let router = Router::new().route(
            "/echo",
            get(|axum::extract::RawQuery(query): axum::extract::RawQuery| async move {
                Json(json!({ "query": query }))
            }),
        );
        let client = client(&serve(router).await);

        let body: Value = client
            .fetch_json(
                "echo",
                &[("vs_currency".to_string(), "usd".to_string())],
                ExecuteOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(body["query"], "vs_currency=usd");
    }

    #[tokio::test]
    async fn test_rate_limit_is_typed_and_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = counting_router(hits.clone(), |_| {
            (AxumStatus::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down").into_response()
        });
        let client = client(&serve(router).await);

        let result: Result<Value, _> = client.fetch_json("target", &[], ExecuteOptions::default()).await;
        assert_eq!(result, Err(FetchError::rate_limited(Some(7))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = counting_router(hits.clone(), |_| AxumStatus::NOT_FOUND.into_response());
        let client = client(&serve(router).await);

        let result: Result<Value, _> = client.fetch_json("target", &[], ExecuteOptions::default()).await;
        match result {
            Err(FetchError::Http { status, message, skip_retry }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "Not Found");
                assert!(skip_retry);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = counting_router(hits.clone(), |n| {
            if n < 2 {
                (AxumStatus::INTERNAL_SERVER_ERROR, "boom").into_response()
            } else {
                Json(json!({ "ok": true })).into_response()
            }
        });
        let client = client(&serve(router).await);

        let body: Value = client
            .fetch_json("target", &[], ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(body, json!({ "ok": true }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_json_is_decode_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = counting_router(hits.clone(), |_| "not json".into_response());
        let client = client(&serve(router).await);

        let result: Result<Value, _> = client.fetch_json("target", &[], ExecuteOptions::default()).await;
        assert!(matches!(result, Err(FetchError::Decode(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(&format!("http://{addr}"));
        let result: Result<Value, _> = client.fetch_json("target", &[], ExecuteOptions::no_retry()).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
