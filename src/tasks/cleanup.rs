//! Stale Cleanup Task
//!
//! Expired fast-tier entries are kept as stale fallback data; this task
//! drops the ones that have outlived the retention window.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheManager;

/// Spawns a background task that periodically purges long-expired entries.
///
/// # Arguments
/// * `cache` - Cache whose fast tier is swept
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
/// * `stale_retention` - How long an expired entry stays available as stale data
///
/// # Returns
/// A JoinHandle for the spawned task, aborted during graceful shutdown.
pub fn spawn_cleanup_task<V>(
    cache: CacheManager<V>,
    cleanup_interval_secs: u64,
    stale_retention: Duration,
) -> JoinHandle<()>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            retention_secs = stale_retention.as_secs(),
            "Starting stale cleanup task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.purge_expired(stale_retention).await;
            if removed > 0 {
                info!(removed, "Stale cleanup: purged expired entries");
            } else {
                debug!("Stale cleanup: nothing to purge");
            }
        }
    })
}
