//! Retry classification and exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;

// == Retry Policy ==
/// How many times and how far apart failed attempts are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Spread delays to avoid synchronized retries across callers
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    // == Backoff ==
    /// Delay before retry number `retry` (0-based).
    ///
    /// `min(base * multiplier^retry, max_delay)`; with jitter, half of that
    /// plus a random share of the other half.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64()).max(0.0);
        let delay = Duration::from_secs_f64(capped);

        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        let spread = rand::thread_rng().gen_range(0.0..=1.0);
        half + half.mul_f64(spread)
    }
}

// == Classification ==
/// Whether a failed attempt should be retried.
///
/// - never: 400, 404, 429, or anything flagged non-retryable
/// - always: 5xx and failures without a status code
/// - any other 4xx: no
pub fn should_retry(err: &FetchError) -> bool {
    if err.skip_retry() {
        return false;
    }
    match err.status() {
        Some(400) | Some(404) | Some(429) => false,
        Some(status) if status >= 500 => true,
        Some(_) => false,
        None => true,
    }
}

// == Retry Driver ==
/// Runs `op` until it succeeds, fails terminally or the budget is spent.
///
/// Returns the last error on exhaustion. Cancellation during a backoff wait
/// ends with [`FetchError::Cancelled`].
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut retries = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !should_retry(&err) {
            debug!(error = %err, "Terminal failure, not retrying");
            return Err(err);
        }
        if retries >= policy.max_retries {
            warn!(error = %err, attempts = retries + 1, "Retry budget exhausted");
            return Err(err);
        }

        let delay = policy.backoff_delay(retries);
        retries += 1;
        warn!(
            error = %err,
            retry = retries,
            delay_ms = delay.as_millis() as u64,
            "Retrying after failure"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed_policy() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_classification() {
        assert!(!should_retry(&FetchError::http(400, "bad")));
        assert!(!should_retry(&FetchError::http(404, "missing")));
        assert!(!should_retry(&FetchError::rate_limited(None)));
        assert!(!should_retry(&FetchError::http(403, "forbidden")));
        assert!(!should_retry(&FetchError::NonRetryable("no".into())));
        assert!(should_retry(&FetchError::http(500, "boom")));
        assert!(should_retry(&FetchError::http(503, "down")));
        assert!(should_retry(&FetchError::Network("reset".into())));
    }

    #[test]
    fn test_caller_flag_overrides_5xx() {
        let err = FetchError::Http {
            status: 502,
            message: "bad gateway".into(),
            skip_retry: true,
        };
        assert!(!should_retry(&err));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = fixed_policy();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for retry in 0..6 {
            let ceiling = fixed_policy().backoff_delay(retry);
            let delay = policy.backoff_delay(retry);
            assert!(delay >= ceiling / 2 && delay <= ceiling, "{delay:?} vs {ceiling:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry(&fixed_policy(), &CancellationToken::new(), || async {
            match attempts.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(FetchError::http(500, "boom")),
                _ => Ok("ok"),
            }
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_attempted_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fixed_policy(), &CancellationToken::new(), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::http(404, "missing"))
        })
        .await;

        assert!(matches!(result, Err(FetchError::Http { status: 404, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fixed_policy(), &CancellationToken::new(), || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Network(format!("reset {n}")))
        })
        .await;

        assert_eq!(result, Err(FetchError::Network("reset 3".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = retry(&fixed_policy(), &cancel, || async {
            Err(FetchError::http(503, "down"))
        })
        .await;

        assert_eq!(result, Err(FetchError::Cancelled));
    }
}
