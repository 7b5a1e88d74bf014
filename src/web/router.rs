//! Router configuration for the web server.

use std::path::Path;
use std::sync::Arc;

use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

use super::ws::{terminal_ws_handler, TerminalWsState};

/// Create the main router: `/ws`, `/health` and, when enabled, the
/// browser client's static files.
pub fn create_router(state: Arc<TerminalWsState>, config: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/ws", get(terminal_ws_handler))
        .with_state(state)
        .merge(create_health_router());

    if config.serve_static {
        if Path::new(&config.static_path).is_dir() {
            router = router.fallback_service(ServeDir::new(&config.static_path));
        } else {
            tracing::warn!(
                "Static path {} does not exist; not serving static files",
                config.static_path
            );
        }
    }

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(create_cors_layer(&config.cors_origins)),
    )
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

/// Create a CORS layer for the given origins. No origins allows any.
pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::OPTIONS];

    let parsed_origins: Vec<HeaderValue> =
        origins.iter().filter_map(|o| o.parse().ok()).collect();

    if parsed_origins.is_empty() {
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(Any)
            .allow_origin(Any)
    } else {
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE, ACCEPT])
            .allow_origin(parsed_origins)
    }
}
