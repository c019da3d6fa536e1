//! API Routes
//!
//! Configures the Axum router with the proxy and admin endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, health_handler, items_handler, proxy_handler, stats_handler,
    AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /api/*path` - Cached upstream proxy
/// - `GET /stats` - Cache and limiter statistics
/// - `GET /cache/items` - Fast-tier entries
/// - `DELETE /cache/:key` - Delete a key from both tiers
/// - `POST /cache/clear` - Clear the fast tier and stats
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/*path", get(proxy_handler))
        .route("/stats", get(stats_handler))
        .route("/cache/items", get(items_handler))
        .route("/cache/clear", post(clear_handler))
        .route("/cache/:key", delete(delete_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
