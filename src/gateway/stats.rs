use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters for the gateway's loops.
#[derive(Debug, Default)]
pub struct GatewayStats {
    delivered: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_unregistered: AtomicU64,
    dropped_backpressure: AtomicU64,
    send_failures: AtomicU64,
    keepalive_evictions: AtomicU64,
    rejected_connections: AtomicU64,
    close_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub dropped_malformed: u64,
    pub dropped_unregistered: u64,
    pub dropped_backpressure: u64,
    pub send_failures: u64,
    pub keepalive_evictions: u64,
    pub rejected_connections: u64,
    pub close_failures: u64,
}

impl GatewayStats {
    pub(crate) fn record_delivered(&self, n: u64) {
        self.delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.dropped_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unregistered(&self) {
        self.dropped_unregistered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backpressure(&self) {
        self.dropped_backpressure.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.keepalive_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unregistered: self.dropped_unregistered.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            keepalive_evictions: self.keepalive_evictions.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
        }
    }
}
