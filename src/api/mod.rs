//! API Module
//!
//! HTTP handlers and routing for the cache service.
//!
//! # Endpoints
//! - `GET /api/*path` - Cached upstream proxy
//! - `GET /stats` - Cache and limiter statistics
//! - `GET /cache/items` - Fast-tier entries
//! - `DELETE /cache/:key` - Delete a key
//! - `POST /cache/clear` - Clear the fast tier
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
