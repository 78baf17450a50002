pub mod ws;

use async_trait::async_trait;

pub use ws::WsConnection;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
}

/// A bidirectional text transport owned by the hosting layer.
///
/// The gateway calls these concurrently from its writer, keepalive and
/// shutdown paths, so implementations take `&self` and serialize internally.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Complete a pending handshake.
    async fn accept(&self) -> Result<(), TransportError>;

    /// Wait for the next inbound text frame.
    async fn receive_text(&self) -> Result<String, TransportError>;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close with `code` and `reason`. Closing an already closed transport
    /// succeeds without sending anything.
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;
}
