use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::bus::BusError;
use crate::gateway::events::EnvelopeError;
use crate::gateway::session::ConnectionId;
use crate::publisher::PublishError;
use crate::transport::TransportError;

/// Errors returned by gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway is not running")]
    NotRunning,
    #[error("gateway was already started")]
    AlreadyStarted,
    #[error("failed to subscribe to the bus: {0}")]
    Subscribe(#[from] BusError),
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    #[error("connection {connection} is registered under session {session:?}")]
    SessionMismatch {
        connection: ConnectionId,
        session: String,
    },
    #[error("session {session:?} reached its connection limit ({limit})")]
    ConnectionLimit { session: String, limit: usize },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug)]
pub enum AppError {
    Bus(BusError),
    Internal(String),
    BadRequest(String),
    Unavailable(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Bus(_) => "bus_error",
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "invalid_request",
            AppError::Unavailable(_) => "unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Bus(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Bus(e) => {
                tracing::error!("bus error: {e}");
                "event bus unavailable".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {e}");
                "internal server error".to_string()
            }
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Unavailable(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.message()
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<BusError> for AppError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::InvalidPattern { .. } => AppError::BadRequest(e.to_string()),
            _ => AppError::Bus(e),
        }
    }
}

impl From<EnvelopeError> for AppError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Encode(_) => AppError::Internal(e.to_string()),
            _ => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<PublishError> for AppError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Envelope(e) => e.into(),
            PublishError::Bus(e) => e.into(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotRunning => AppError::Unavailable(e.to_string()),
            GatewayError::Subscribe(bus) => AppError::Bus(bus),
            _ => AppError::BadRequest(e.to_string()),
        }
    }
}
