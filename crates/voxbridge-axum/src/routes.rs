//! Route definitions and router construction.

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bootstrap::CorsConfig;
use crate::state::AppState;
use crate::{call_ws, handlers};

/// Translate the configured cross-origin policy into a tower layer.
///
/// Origins that fail to parse as header values are skipped rather than
/// aborting startup; a misconfigured origin simply stays blocked.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match config {
        CorsConfig::AllowAll => base.allow_origin(Any),
        CorsConfig::AllowOrigins(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            base.allow_origin(allowed)
        }
    }
}

/// Build the full application router.
pub fn create_router(ctx: AppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/calls", post(handlers::create_call))
        .route("/api/calls/{session_id}/ws", get(call_ws::call_ws))
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
