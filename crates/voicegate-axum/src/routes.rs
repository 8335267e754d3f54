//! Router assembly.

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use voicegate_core::config::AllowedOrigins;

use crate::handlers;
use crate::state::AppState;

/// Build the gateway router: the WebSocket data plane plus a liveness probe.
/// Per-message compression is never negotiated — latency beats bandwidth for
/// short PCM frames.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.allowed_origins);

    Router::new()
        .route("/ws", get(handlers::session_ws::session_ws))
        .route("/healthz", get(handlers::healthz))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    match origins {
        AllowedOrigins::Any => CorsLayer::new().allow_origin(Any),
        AllowedOrigins::List(list) => {
            let parsed: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
        }
    }
}
