mod gateway;
mod health;
mod publish;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/ws", get(gateway::ws_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Publishing
        .route("/channels/{channel}/events", post(publish::publish_event))
        .route("/channels/{channel}/payloads", post(publish::publish_payload))
        // Gateway introspection
        .route("/gateway/stats", get(gateway::get_stats))
        .route(
            "/gateway/sessions/{session}",
            get(gateway::get_session_connections),
        )
}
