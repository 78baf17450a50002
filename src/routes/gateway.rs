use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::gateway::events::{close_code, ClientFrame};
use crate::gateway::session::ConnectionHandle;
use crate::state::AppState;
use crate::transport::{Connection, WsConnection};

#[derive(Deserialize)]
pub struct WsParams {
    pub session: String,
    /// Comma-separated initial channels.
    #[serde(default)]
    pub channels: String,
}

fn split_channels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: WsParams, state: AppState) {
    let (conn, mut stream) = WsConnection::split(socket);
    let handle = ConnectionHandle::new(conn.clone());
    let session = params.session;

    let registered = state
        .gateway
        .subscribe_user(&session, &handle, split_channels(&params.channels), true)
        .await;
    match registered {
        Ok(_) => {}
        // The gateway already closed the socket with a policy violation.
        Err(GatewayError::ConnectionLimit { .. }) => return,
        Err(GatewayError::NotRunning) => {
            let _ = conn.close(close_code::SERVER_SHUTDOWN, "Server shutdown").await;
            return;
        }
        Err(e) => {
            tracing::warn!("rejecting websocket for session {session:?}: {e}");
            let _ = conn.close(close_code::POLICY_VIOLATION, &e.to_string()).await;
            return;
        }
    }

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                conn.deliver_inbound(text.as_str());
                handle_client_frame(&state, &session, &handle, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("websocket read error on connection {}: {e}", handle.id());
                break;
            }
        }
    }

    conn.mark_closed();
    state
        .gateway
        .unsubscribe_user(&session, Some(&handle), None, true)
        .await;
}

async fn handle_client_frame(
    state: &AppState,
    session: &str,
    handle: &ConnectionHandle,
    text: &str,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(_) => {
            tracing::debug!("ignoring client frame on connection {}: {text}", handle.id());
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe { channels } => {
            if let Err(e) = state
                .gateway
                .subscribe_user(session, handle, channels, true)
                .await
            {
                tracing::warn!("subscribe from connection {} failed: {e}", handle.id());
            }
        }
        ClientFrame::Unsubscribe { channels } => {
            state
                .gateway
                .unsubscribe_user(session, Some(handle), Some(channels.as_slice()), false)
                .await;
        }
    }
}

pub async fn get_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let gateway = &state.gateway;
    Json(serde_json::json!({
        "data": {
            "running": gateway.is_running(),
            "sessions": gateway.session_count(),
            "connections": gateway.connection_count(),
            "counters": gateway.stats(),
        }
    }))
}

pub async fn get_session_connections(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": state.gateway.connections(&session) }))
}
