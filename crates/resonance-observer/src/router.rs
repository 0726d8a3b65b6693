//! Axum router construction.
//!
//! Assembles all routes (REST, `WebSocket`, SSE) into a single [`Router`]
//! with CORS and request tracing enabled.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::sse;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /health` -- liveness probe
/// - `GET /ws/state` -- `WebSocket` state stream
/// - `GET /sse/state` -- Server-Sent Events state stream
/// - `GET /api/state` -- current state
/// - `GET /api/history` -- mutation history
/// - `GET /api/analytics/{channel}` -- channel statistics
/// - `GET /api/transitions` -- threshold crossings
/// - `GET /api/subscribers` -- subscriber status
/// - `POST /api/contributions` -- producer entrypoint
///
/// CORS allows any origin so browser dashboards on other hosts can connect.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        // Streams
        .route("/ws/state", get(ws::ws_state))
        .route("/sse/state", get(sse::sse_state))
        // REST API
        .route("/api/state", get(handlers::get_state))
        .route("/api/history", get(handlers::get_history))
        .route("/api/analytics/{channel}", get(handlers::get_analytics))
        .route("/api/transitions", get(handlers::list_transitions))
        .route("/api/subscribers", get(handlers::list_subscribers))
        .route("/api/contributions", post(handlers::post_contribution))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
