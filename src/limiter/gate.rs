//! Bounded-concurrency gate with retry and cooperative cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LimiterConfig;
use crate::error::FetchError;
use crate::limiter::retry::{retry, RetryPolicy};

/// Length of the request-counting window.
pub const WINDOW: Duration = Duration::from_secs(60);

// == Execute Options ==
/// Per-call options for [`RateLimiter::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Run the operation once, without the retry policy
    pub skip_retry: bool,
    /// Cancels the call while queued, running or waiting to retry
    pub signal: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn no_retry() -> Self {
        Self {
            skip_retry: true,
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

// == Stats ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimiterStatus {
    Ready,
    Busy,
}

/// Read-only limiter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub active_requests: usize,
    pub queue_size: usize,
    pub max_concurrent: usize,
    pub status: LimiterStatus,
    /// Calls admitted to a slot since `window_start`
    pub requests_in_window: u64,
    pub window_start: DateTime<Utc>,
    pub is_busy: bool,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    started_at: DateTime<Utc>,
    count: u64,
}

/// Holds a counter up for as long as it lives.
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// == Rate Limiter ==
/// Admits at most `max_concurrency` operations at once; the rest wait in
/// FIFO order. Each admitted operation runs under the retry policy unless
/// told otherwise.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Semaphore,
    max_concurrency: usize,
    retry: RetryPolicy,
    active: AtomicUsize,
    queued: AtomicUsize,
    /// Cancelled and replaced by `clear_queue`
    queue_generation: Mutex<CancellationToken>,
    window: Mutex<Window>,
}

impl RateLimiter {
    // == Constructor ==
    pub fn new(config: LimiterConfig) -> Self {
        let max_concurrency = config.max_concurrency.max(1);
        info!(
            max_concurrency,
            max_retries = config.retry.max_retries,
            "Rate limiter initialized"
        );
        Self {
            semaphore: Semaphore::new(max_concurrency),
            max_concurrency,
            retry: config.retry,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            queue_generation: Mutex::new(CancellationToken::new()),
            window: Mutex::new(Window {
                started: Instant::now(),
                started_at: Utc::now(),
                count: 0,
            }),
        }
    }

    // == Execute ==
    /// Runs `op` once a slot is free.
    ///
    /// `op` is called again for each retry. A cancelled call never holds a
    /// slot: while queued it is dropped without running, while running its
    /// future is dropped and the slot released at once.
    pub async fn execute<T, F, Fut>(&self, op: F, options: ExecuteOptions) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let skip_retry = options.skip_retry;
        let signal = options.signal.unwrap_or_default();
        if signal.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let _permit = match self.semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(FetchError::LimiterClosed),
            Err(TryAcquireError::NoPermits) => {
                let queue = self.queue_generation.lock().clone();
                let _queued = CountGuard::new(&self.queued);
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        debug!("Queued request cancelled");
                        return Err(FetchError::Cancelled);
                    }
                    _ = queue.cancelled() => return Err(FetchError::QueueCleared),
                    permit = self.semaphore.acquire() => {
                        permit.map_err(|_| FetchError::LimiterClosed)?
                    }
                }
            }
        };

        self.record_admission();
        let _active = CountGuard::new(&self.active);
        let mut op = op;
        let run = async {
            if skip_retry {
                op().await
            } else {
                retry(&self.retry, &signal, op).await
            }
        };

        tokio::select! {
            biased;
            _ = signal.cancelled() => {
                debug!("Running request cancelled, releasing slot");
                Err(FetchError::Cancelled)
            }
            result = run => result,
        }
    }

    fn record_admission(&self) {
        let now = Instant::now();
        let mut window = self.window.lock();
        if now.duration_since(window.started) > WINDOW {
            window.started = now;
            window.started_at = Utc::now();
            window.count = 1;
        } else {
            window.count += 1;
        }
    }

    // == Introspection ==
    pub fn queue_size(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// True while every slot is taken.
    pub fn is_busy(&self) -> bool {
        self.active_count() >= self.max_concurrency
    }

    pub fn get_stats(&self) -> LimiterStats {
        let is_busy = self.is_busy();
        let window = self.window.lock();
        LimiterStats {
            active_requests: self.active_count(),
            queue_size: self.queue_size(),
            max_concurrent: self.max_concurrency,
            status: if is_busy {
                LimiterStatus::Busy
            } else {
                LimiterStatus::Ready
            },
            requests_in_window: window.count,
            window_start: window.started_at,
            is_busy,
        }
    }

    // == Clear Queue ==
    /// Drops every task still waiting for a slot; they resolve with
    /// [`FetchError::QueueCleared`]. Running tasks are not touched.
    pub fn clear_queue(&self) -> usize {
        let dropped = self.queue_size();
        let previous = std::mem::replace(&mut *self.queue_generation.lock(), CancellationToken::new());
        previous.cancel();
        if dropped > 0 {
            info!(dropped, "Cleared limiter queue");
        }
        dropped
    }

    // == Close ==
    /// Clears the queue and refuses further calls.
    pub fn close(&self) {
        self.clear_queue();
        self.semaphore.close();
        info!("Rate limiter closed");
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}
