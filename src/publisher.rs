use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::bus::{BusError, PubSubBus};
use crate::gateway::events::{EnvelopeError, EventEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Publishes event envelopes to the bus in the gateway's wire format.
///
/// Fire-and-forget: nothing is retried, and there is no ordering across
/// channels.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn PubSubBus>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn PubSubBus>) -> Self {
        Self { bus }
    }

    /// Build an envelope from its parts and publish it to `channel`.
    /// Returns the number of bus subscriptions that received it.
    pub async fn publish<E: Serialize>(
        &self,
        channel: &str,
        event: E,
        data: Map<String, Value>,
        extra: Map<String, Value>,
    ) -> Result<usize, PublishError> {
        let envelope = EventEnvelope::new(event, data).with_extra(extra);
        self.publish_payload(channel, &envelope).await
    }

    /// Publish an already-built envelope verbatim.
    pub async fn publish_payload<E: Serialize>(
        &self,
        channel: &str,
        envelope: &EventEnvelope<E>,
    ) -> Result<usize, PublishError> {
        let body = envelope.to_json()?;
        let receivers = self.bus.publish(channel, Bytes::from(body)).await?;
        tracing::debug!("published to {channel} ({receivers} receiver(s))");
        Ok(receivers)
    }
}
