use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::events::{close_code, PING_FRAME};
use super::registry::EventTag;
use super::session::ConnectionHandle;
use super::GatewayInner;

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Periodically ping connections that have been idle for a full interval
/// and evict the ones that do not answer in time.
///
/// Cancellation abandons a probe batch in flight, leaving its connections
/// registered so `stop()` closes them.
pub(crate) async fn run_prober<E: EventTag>(inner: Arc<GatewayInner<E>>, cancel: CancellationToken) {
    let period = inner.config.keepalive_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let stale = inner.index.lock().stale(Instant::now(), period);
        if stale.is_empty() {
            continue;
        }
        tracing::debug!("probing {} idle connection(s)", stale.len());

        let batch = join_all(stale.into_iter().map(|handle| probe(&inner, handle)));
        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcomes = batch => outcomes,
        };

        let evictions = outcomes.into_iter().flatten().map(|(handle, failure)| {
            let inner = &inner;
            async move {
                tracing::info!("ping to connection {} failed ({failure}), closing", handle.id());
                if inner
                    .retire(&handle, close_code::KEEPALIVE_TIMEOUT, "Ping timeout")
                    .await
                {
                    inner.stats.record_eviction();
                }
            }
        });
        join_all(evictions).await;
    }

    tracing::debug!("keepalive prober stopped");
}

/// Ping one connection and wait for any reply. Returns the handle and the
/// reason if the probe failed.
async fn probe<E: EventTag>(
    inner: &GatewayInner<E>,
    handle: ConnectionHandle,
) -> Option<(ConnectionHandle, String)> {
    let transport = handle.transport().clone();
    let result = tokio::time::timeout(inner.config.keepalive_timeout, async {
        transport.send_text(PING_FRAME).await?;
        transport.receive_text().await
    })
    .await;

    let failure = match result {
        Ok(Ok(frame)) if !frame.is_empty() => {
            inner.index.lock().touch(handle.id(), Instant::now());
            return None;
        }
        Ok(Ok(_)) => "empty reply".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(_) => "pong not received".to_string(),
    };
    Some((handle, failure))
}
