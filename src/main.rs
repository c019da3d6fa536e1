//! Upstream Cache - caching proxy server
//!
//! Serves a rate-limited upstream API through the tiered cache.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upstream_cache::api::create_router;
use upstream_cache::persistent::{MemoryStore, PersistentTier};
use upstream_cache::{spawn_cleanup_task, AppState, Config};

/// Main entry point for the caching proxy.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect the persistent tier and build cache, limiter and upstream client
/// 4. Start background stale cleanup task
/// 5. Start HTTP server on configured port
/// 6. On SIGINT/SIGTERM: stop cleanup, close the limiter, then the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upstream_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting upstream cache server");

    let config = Config::from_env();
    info!(
        max_items = config.max_items,
        max_bytes = config.max_bytes,
        default_ttl_ms = config.default_ttl_ms,
        port = config.server_port,
        upstream = %config.upstream_base_url,
        max_concurrency = config.max_concurrency,
        "Configuration loaded"
    );

    let persistent = persistent_tier(&config).await;
    let state = AppState::from_config(&config, persistent).context("failed to build upstream client")?;
    let cache = state.cache.clone();
    let limiter = state.limiter.clone();

    let cleanup_handle = spawn_cleanup_task(
        cache.clone(),
        config.cleanup_interval,
        Duration::from_secs(config.stale_retention),
    );

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            cleanup_handle.abort();
            warn!("Cleanup task aborted");
            limiter.close();
        })
        .await
        .context("server error")?;

    cache.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Picks the persistent tier: Redis when configured and compiled in,
/// otherwise an in-process store.
async fn persistent_tier(config: &Config) -> PersistentTier {
    match &config.redis_url {
        #[cfg(feature = "redis-store")]
        Some(url) => match upstream_cache::persistent::RedisStore::connect(url).await {
            Ok(store) => PersistentTier::new(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Redis unreachable, persistent tier disabled");
                PersistentTier::disabled()
            }
        },
        #[cfg(not(feature = "redis-store"))]
        Some(_) => {
            warn!("REDIS_URL is set but the redis-store feature is off, using in-process store");
            PersistentTier::new(Arc::new(MemoryStore::new()))
        }
        None => {
            info!("Using in-process persistent store");
            PersistentTier::new(Arc::new(MemoryStore::new()))
        }
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
