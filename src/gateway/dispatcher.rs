use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::events::{EnvelopeError, EventEnvelope};
use super::index::Frame;
use super::registry::EventTag;
use super::session::ConnectionHandle;
use super::stats::GatewayStats;
use super::{GatewayInner, ListenerExit};
use crate::bus::{BusMessage, BusStream};

/// Consume the pattern subscription until shutdown or until the bus fails.
///
/// There is no reconnect here: a failed or finished subscription ends the
/// loop and the exit reason is handed back to the caller.
pub(crate) async fn run_listener<E: EventTag>(
    inner: Arc<GatewayInner<E>>,
    mut stream: BusStream,
    cancel: CancellationToken,
) -> ListenerExit {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ListenerExit::Shutdown,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(BusMessage::Pattern {
                channel, payload, ..
            })) => {
                inner.dispatch(&channel, &payload);
            }
            Some(Ok(other)) => {
                tracing::debug!("ignoring non-pattern bus item: {:?}", other);
            }
            Some(Err(e)) => {
                tracing::error!("bus subscription failed: {e}");
                return ListenerExit::Failed(e);
            }
            None => {
                tracing::error!("bus subscription ended");
                return ListenerExit::StreamEnded;
            }
        }
    }
}

impl<E: EventTag> GatewayInner<E> {
    /// Validate one bus payload and queue its raw text for every interested
    /// connection. Returns the number of connections it was queued for.
    pub(crate) fn dispatch(&self, channel: &str, payload: &[u8]) -> usize {
        let envelope = match EventEnvelope::<E>::decode(payload) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::NotFanOut) => {
                tracing::debug!("skipping non fan-out payload on {channel}");
                self.stats.record_malformed();
                return 0;
            }
            Err(e) => {
                tracing::warn!(
                    "dropping payload on {channel}: {e}; raw data: {}",
                    String::from_utf8_lossy(payload)
                );
                self.stats.record_malformed();
                return 0;
            }
        };

        if !self.registry.is_registered(&envelope.event) {
            tracing::error!(
                "event {:?} isn't registered, dropping payload on {channel}",
                envelope.event
            );
            self.stats.record_unregistered();
            return 0;
        }

        let frame: Frame = match std::str::from_utf8(payload) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::warn!("dropping non utf-8 payload on {channel}: {e}");
                self.stats.record_malformed();
                return 0;
            }
        };

        let targets = self.index.lock().fanout_targets(channel, Instant::now());
        let mut queued = 0;
        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("outbound queue full for connection {id}, dropping frame on {channel}");
                    self.stats.record_backpressure();
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("connection {id} writer already stopped");
                }
            }
        }

        self.stats.record_delivered(queued as u64);
        queued
    }
}

/// Drain one connection's outbound queue in order. A failed send is logged
/// and counted; the connection stays registered.
pub(crate) async fn write_loop(
    handle: ConnectionHandle,
    mut rx: mpsc::Receiver<Frame>,
    stats: Arc<GatewayStats>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = handle.transport().send_text(&frame).await {
            tracing::warn!("send to connection {} failed: {e}", handle.id());
            stats.record_send_failure();
        }
    }
}
