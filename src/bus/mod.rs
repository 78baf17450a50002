pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub use memory::InMemoryBus;

/// Pattern that matches every channel on the bus.
pub const ALL_CHANNELS: &str = "*";

/// An item yielded by a bus subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// Confirmation that a pattern subscription is live.
    Subscribed { pattern: String, count: usize },
    /// A message received on a plain channel subscription.
    Message { channel: String, payload: Bytes },
    /// A message received through a pattern subscription.
    Pattern {
        pattern: String,
        channel: String,
        payload: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    #[error("invalid subscription pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("bus disconnected: {0}")]
    Disconnected(String),
    #[error("bus error: {0}")]
    Backend(String),
}

/// Lazy, unbounded sequence of bus items. Dropping it closes the subscription.
pub type BusStream = BoxStream<'static, Result<BusMessage, BusError>>;

/// Backend publish/subscribe bus. Implementations own their transport and
/// reconnection; a stream error means the subscription is unusable.
#[async_trait]
pub trait PubSubBus: Send + Sync {
    /// Publish `payload` to `channel`, returning how many subscriptions received it.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BusError>;

    /// Open a pattern subscription.
    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, BusError>;
}
