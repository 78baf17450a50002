use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::state::AppState;

/// Healthy while the gateway is fanning out.
pub async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.gateway.is_healthy() {
        (StatusCode::OK, "ok")
    } else if state.gateway.is_running() {
        (StatusCode::SERVICE_UNAVAILABLE, "fan-out listener stopped")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "gateway not running")
    }
}

pub async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("GIT_SHA"),
    }))
}
