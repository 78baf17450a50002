use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::session::{ConnectionHandle, ConnectionId};

/// A frame queued for one connection's writer.
pub(crate) type Frame = Arc<str>;

pub(crate) struct ConnectionEntry {
    pub session: String,
    pub handle: ConnectionHandle,
    pub outbound: mpsc::Sender<Frame>,
    pub writer: AbortHandle,
    pub connected_at: DateTime<Utc>,
    /// Set once a removal path has claimed the connection.
    pub closing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub session: String,
    pub channels: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// Session, interest and activity indexes for registered connections.
///
/// Every map is keyed consistently: a connection id is present in
/// `channels`, `last_active` and `entries` exactly when it is listed under
/// its session in `sessions`.
#[derive(Default)]
pub(crate) struct ConnectionIndex {
    sessions: HashMap<String, HashSet<ConnectionId>>,
    channels: HashMap<ConnectionId, HashSet<String>>,
    last_active: HashMap<ConnectionId, Instant>,
    entries: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionIndex {
    pub fn session_of(&self, id: ConnectionId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.session.as_str())
    }

    pub fn is_closing(&self, id: ConnectionId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.closing)
    }

    pub fn session_len(&self, session: &str) -> usize {
        self.sessions.get(session).map_or(0, HashSet::len)
    }

    /// Connections of `session` that no removal path has claimed yet.
    pub fn live_session_len(&self, session: &str) -> usize {
        self.sessions.get(session).map_or(0, |ids| {
            ids.iter()
                .filter(|id| self.entries.get(id).is_some_and(|e| !e.closing))
                .count()
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.entries.len()
    }

    pub fn connections_of(&self, session: &str) -> Vec<ConnectionId> {
        self.sessions
            .get(session)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Handles of the session's connections that are not being removed.
    pub fn handles_of(&self, session: &str) -> Vec<ConnectionHandle> {
        self.connections_of(session)
            .into_iter()
            .filter_map(|id| self.entries.get(&id))
            .filter(|entry| !entry.closing)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub fn channels_of(&self, id: ConnectionId) -> Option<&HashSet<String>> {
        self.channels.get(&id)
    }

    #[cfg(test)]
    pub fn last_active(&self, id: ConnectionId) -> Option<Instant> {
        self.last_active.get(&id).copied()
    }

    pub fn insert(&mut self, entry: ConnectionEntry, channels: HashSet<String>, now: Instant) {
        let id = entry.handle.id();
        self.sessions
            .entry(entry.session.clone())
            .or_default()
            .insert(id);
        self.channels.insert(id, channels);
        self.last_active.insert(id, now);
        self.entries.insert(id, entry);
    }

    pub fn extend_channels(
        &mut self,
        id: ConnectionId,
        channels: impl IntoIterator<Item = String>,
        now: Instant,
    ) {
        if let Some(current) = self.channels.get_mut(&id) {
            current.extend(channels);
            self.last_active.insert(id, now);
        }
    }

    /// Subtract `channels` from a connection's interest. Returns how many
    /// channels remain, or `None` if the connection is unknown.
    pub fn remove_channels(&mut self, id: ConnectionId, channels: &[String]) -> Option<usize> {
        let current = self.channels.get_mut(&id)?;
        for channel in channels {
            current.remove(channel);
        }
        Some(current.len())
    }

    /// Outbound queues of every live connection interested in `channel`.
    /// Each returned connection is stamped active at `now`.
    pub fn fanout_targets(
        &mut self,
        channel: &str,
        now: Instant,
    ) -> Vec<(ConnectionId, mpsc::Sender<Frame>)> {
        let mut targets = Vec::new();
        for (id, interest) in &self.channels {
            if !interest.contains(channel) {
                continue;
            }
            let Some(entry) = self.entries.get(id) else {
                continue;
            };
            if entry.closing {
                continue;
            }
            targets.push((*id, entry.outbound.clone()));
        }
        for (id, _) in &targets {
            self.last_active.insert(*id, now);
        }
        targets
    }

    /// Live connections idle for at least `interval` as of `now`.
    pub fn stale(&self, now: Instant, interval: Duration) -> Vec<ConnectionHandle> {
        self.entries
            .values()
            .filter(|entry| !entry.closing)
            .filter(|entry| {
                let last = self
                    .last_active
                    .get(&entry.handle.id())
                    .copied()
                    .unwrap_or(now);
                now.saturating_duration_since(last) >= interval
            })
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub fn touch(&mut self, id: ConnectionId, now: Instant) {
        if let Some(last) = self.last_active.get_mut(&id) {
            *last = now;
        }
    }

    /// Reserve a connection for removal. Only the first caller gets the
    /// handle back; the writer stops and fan-out skips it from here on.
    pub fn claim(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        let entry = self.entries.get_mut(&id)?;
        if entry.closing {
            return None;
        }
        entry.closing = true;
        entry.writer.abort();
        entry.handle.mark_closed();
        Some(entry.handle.clone())
    }

    pub fn claim_all(&mut self) -> Vec<ConnectionHandle> {
        let ids: Vec<ConnectionId> = self.entries.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.claim(id)).collect()
    }

    /// Drop a connection from every index, and its session if now empty.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.entries.remove(&id)?;
        self.channels.remove(&id);
        self.last_active.remove(&id);
        if let Some(ids) = self.sessions.get_mut(&entry.session) {
            ids.remove(&id);
            if ids.is_empty() {
                self.sessions.remove(&entry.session);
            }
        }
        Some(entry)
    }

    pub fn clear(&mut self) {
        for entry in self.entries.values() {
            entry.writer.abort();
        }
        self.sessions.clear();
        self.channels.clear();
        self.last_active.clear();
        self.entries.clear();
    }

    pub fn summaries(&self, session: &str, now: Instant) -> Vec<ConnectionSummary> {
        let mut out: Vec<ConnectionSummary> = self
            .connections_of(session)
            .into_iter()
            .filter_map(|id| {
                let entry = self.entries.get(&id)?;
                let mut channels: Vec<String> = self
                    .channels
                    .get(&id)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                channels.sort();
                let idle_secs = self
                    .last_active
                    .get(&id)
                    .map_or(0, |last| now.saturating_duration_since(*last).as_secs());
                Some(ConnectionSummary {
                    id,
                    session: entry.session.clone(),
                    channels,
                    connected_at: entry.connected_at,
                    idle_secs,
                })
            })
            .collect();
        out.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        out
    }
}
