use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use globset::{Glob, GlobMatcher};
use tokio::sync::mpsc;

use super::{BusError, BusMessage, BusStream, PubSubBus};

struct PatternSubscriber {
    pattern: String,
    matcher: GlobMatcher,
    tx: mpsc::UnboundedSender<Result<BusMessage, BusError>>,
}

/// Process-local bus with glob pattern subscriptions.
///
/// Used by the standalone server and by tests. Every subscription gets its
/// own unbounded queue, so a subscriber that stops polling only grows its own
/// backlog.
pub struct InMemoryBus {
    subscribers: DashMap<u64, PatternSubscriber>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of subscriptions whose stream is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|entry| !entry.value().tx.is_closed())
            .count()
    }

    /// Fail every open subscription, as a backend connection loss would.
    pub fn disconnect(&self, reason: &str) {
        for entry in self.subscribers.iter() {
            let _ = entry
                .value()
                .tx
                .send(Err(BusError::Disconnected(reason.to_string())));
        }
        self.subscribers.clear();
        tracing::warn!("in-memory bus disconnected: {reason}");
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BusError> {
        let mut receivers = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if !sub.matcher.is_match(channel) {
                continue;
            }
            let msg = BusMessage::Pattern {
                pattern: sub.pattern.clone(),
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if sub.tx.send(Ok(msg)).is_ok() {
                receivers += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
        }

        Ok(receivers)
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, BusError> {
        let glob = Glob::new(pattern).map_err(|e| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = tx.send(Ok(BusMessage::Subscribed {
            pattern: pattern.to_string(),
            count: self.subscribers.len() + 1,
        }));
        self.subscribers.insert(
            id,
            PatternSubscriber {
                pattern: pattern.to_string(),
                matcher: glob.compile_matcher(),
                tx,
            },
        );

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}
