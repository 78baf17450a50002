pub mod dispatcher;
pub mod events;
pub mod heartbeat;
pub mod index;
pub mod registry;
pub mod session;
pub mod stats;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, PubSubBus, ALL_CHANNELS};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use events::close_code;
use index::{ConnectionEntry, ConnectionIndex, ConnectionSummary};
use registry::{EventRegistry, EventTag};
use session::{ConnectionHandle, ConnectionState};
use stats::{GatewayStats, StatsSnapshot};

/// Why the fan-out listener stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerExit {
    /// `stop()` was called.
    Shutdown,
    /// The bus reported an error on the subscription.
    Failed(BusError),
    /// The subscription stream finished without an error.
    StreamEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The connection was new to the session and is now registered.
    Registered,
    /// The connection was already registered; its channels were extended.
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

struct Lifecycle {
    phase: Phase,
    cancel: CancellationToken,
    listener: Option<JoinHandle<()>>,
    prober: Option<JoinHandle<()>>,
}

/// State shared between the gateway handle and its background tasks.
pub(crate) struct GatewayInner<E: EventTag> {
    bus: Arc<dyn PubSubBus>,
    config: GatewayConfig,
    registry: EventRegistry<E>,
    index: Mutex<ConnectionIndex>,
    stats: Arc<GatewayStats>,
    running: AtomicBool,
    exit_tx: watch::Sender<Option<ListenerExit>>,
}

/// Fans bus events out to registered connections.
///
/// One instance per process. Indexes live for the span between `start()`
/// and `stop()`; the fan-out listener and keepalive prober run as tokio
/// tasks for that span.
pub struct Gateway<E: EventTag = String> {
    inner: Arc<GatewayInner<E>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl<E: EventTag> Gateway<E> {
    pub fn new(bus: Arc<dyn PubSubBus>, config: GatewayConfig, registry: EventRegistry<E>) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(GatewayInner {
                bus,
                config,
                registry,
                index: Mutex::new(ConnectionIndex::default()),
                stats: Arc::new(GatewayStats::default()),
                running: AtomicBool::new(false),
                exit_tx,
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                phase: Phase::Idle,
                cancel: CancellationToken::new(),
                listener: None,
                prober: None,
            }),
        }
    }

    /// Subscribe to every bus channel and launch the listener and prober.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.phase != Phase::Idle {
            return Err(GatewayError::AlreadyStarted);
        }

        let stream = self.inner.bus.psubscribe(ALL_CHANNELS).await?;
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let cancel = lifecycle.cancel.clone();
        lifecycle.listener = Some(tokio::spawn(async move {
            let exit = dispatcher::run_listener(Arc::clone(&inner), stream, cancel).await;
            if exit != ListenerExit::Shutdown {
                tracing::error!("fan-out listener terminated: {:?}", exit);
            }
            inner.exit_tx.send_replace(Some(exit));
        }));

        let inner = Arc::clone(&self.inner);
        let cancel = lifecycle.cancel.clone();
        lifecycle.prober = Some(tokio::spawn(heartbeat::run_prober(inner, cancel)));

        lifecycle.phase = Phase::Running;
        tracing::info!(
            "gateway started (keepalive {:?}, timeout {:?}, {} connections per session)",
            self.inner.config.keepalive_interval,
            self.inner.config.keepalive_timeout,
            self.inner.config.connection_limit
        );
        Ok(())
    }

    /// Stop both loops, close every registered connection and clear the
    /// indexes. Calling it again is a no-op.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.phase != Phase::Running {
            return;
        }
        lifecycle.phase = Phase::Stopped;

        {
            let _index = self.inner.index.lock();
            self.inner.running.store(false, Ordering::SeqCst);
        }

        lifecycle.cancel.cancel();
        for task in [lifecycle.listener.take(), lifecycle.prober.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = task.await {
                tracing::warn!("gateway task ended abnormally: {e}");
            }
        }

        let handles = self.inner.index.lock().claim_all();
        tracing::info!("gateway stopping, closing {} connection(s)", handles.len());
        join_all(handles.iter().map(|handle| {
            self.inner
                .safe_close(handle, close_code::SERVER_SHUTDOWN, "Server shutdown")
        }))
        .await;

        self.inner.index.lock().clear();
    }

    /// Register `conn` under `session` with interest in `channels`, or add
    /// `channels` to it if it is already registered there.
    pub async fn subscribe_user<I, S>(
        &self,
        session: &str,
        conn: &ConnectionHandle,
        channels: I,
        already_accepted: bool,
    ) -> Result<SubscribeOutcome, GatewayError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.is_running() {
            return Err(GatewayError::NotRunning);
        }
        if conn.state() == ConnectionState::Closed {
            return Err(GatewayError::ConnectionClosed(conn.id()));
        }
        if !already_accepted {
            conn.transport().accept().await?;
        }

        let channels: HashSet<String> = channels.into_iter().map(Into::into).collect();
        let limit = self.inner.config.connection_limit;
        let id = conn.id();

        let admitted = {
            let mut index = self.inner.index.lock();
            if !self.inner.running.load(Ordering::SeqCst) {
                return Err(GatewayError::NotRunning);
            }
            let owner = index.session_of(id).map(str::to_string);
            match owner.as_deref() {
                Some(owner) if owner == session => {
                    if index.is_closing(id) {
                        return Err(GatewayError::ConnectionClosed(id));
                    }
                    index.extend_channels(id, channels, Instant::now());
                    Some(SubscribeOutcome::Extended)
                }
                Some(owner) => {
                    return Err(GatewayError::SessionMismatch {
                        connection: id,
                        session: owner.to_string(),
                    });
                }
                None if index.live_session_len(session) >= limit => None,
                None => {
                    let (tx, rx) = mpsc::channel(self.inner.config.outbound_buffer.max(1));
                    let writer = tokio::spawn(dispatcher::write_loop(
                        conn.clone(),
                        rx,
                        Arc::clone(&self.inner.stats),
                    ))
                    .abort_handle();
                    index.insert(
                        ConnectionEntry {
                            session: session.to_string(),
                            handle: conn.clone(),
                            outbound: tx,
                            writer,
                            connected_at: Utc::now(),
                            closing: false,
                        },
                        channels,
                        Instant::now(),
                    );
                    conn.mark_active();
                    Some(SubscribeOutcome::Registered)
                }
            }
        };

        match admitted {
            Some(outcome) => {
                tracing::debug!("connection {id} {:?} under session {session:?}", outcome);
                Ok(outcome)
            }
            None => {
                tracing::warn!(
                    "session {session:?} is at its limit of {limit} connections, rejecting {id}"
                );
                self.inner.stats.record_rejection();
                conn.mark_closed();
                self.inner
                    .safe_close(
                        conn,
                        close_code::POLICY_VIOLATION,
                        &format!("Connection limit ({limit}) exceeded"),
                    )
                    .await;
                Err(GatewayError::ConnectionLimit {
                    session: session.to_string(),
                    limit,
                })
            }
        }
    }

    /// Remove channel interest or whole connections from `session`.
    ///
    /// Targets `conn` if given, otherwise every connection of the session.
    /// Without `channels` each target is closed and removed. With `channels`
    /// those are subtracted, and a target left with no channels is closed
    /// when `close_if_empty` is set. Returns how many connections were closed.
    pub async fn unsubscribe_user(
        &self,
        session: &str,
        conn: Option<&ConnectionHandle>,
        channels: Option<&[String]>,
        close_if_empty: bool,
    ) -> usize {
        let to_close: Vec<(ConnectionHandle, &'static str)> = {
            let mut index = self.inner.index.lock();
            if index.session_len(session) == 0 {
                return 0;
            }

            let targets: Vec<ConnectionHandle> = match conn {
                Some(handle) => {
                    if index.session_of(handle.id()) == Some(session) && !index.is_closing(handle.id()) {
                        vec![handle.clone()]
                    } else {
                        Vec::new()
                    }
                }
                None => index.handles_of(session),
            };

            match channels {
                None => targets
                    .into_iter()
                    .map(|handle| (handle, "Unsubscribed"))
                    .collect(),
                Some(channels) => targets
                    .into_iter()
                    .filter(|handle| {
                        index.remove_channels(handle.id(), channels) == Some(0) && close_if_empty
                    })
                    .map(|handle| (handle, "No channels remaining"))
                    .collect(),
            }
        };

        let closed = join_all(
            to_close
                .iter()
                .map(|(handle, reason)| self.inner.retire(handle, close_code::NORMAL, reason)),
        )
        .await;
        closed.into_iter().filter(|closed| *closed).count()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Running, with the fan-out listener still consuming the bus.
    pub fn is_healthy(&self) -> bool {
        self.is_running() && self.inner.exit_tx.borrow().is_none()
    }

    /// Why the fan-out listener stopped, if it has.
    pub fn exit_reason(&self) -> Option<ListenerExit> {
        self.inner.exit_tx.borrow().clone()
    }

    /// Resolves once the fan-out listener has exited, with the reason.
    pub async fn listener_exit(&self) -> ListenerExit {
        let mut rx = self.inner.exit_tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(exit) = current {
                return exit;
            }
            if rx.changed().await.is_err() {
                return ListenerExit::Shutdown;
            }
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &EventRegistry<E> {
        &self.inner.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.inner.index.lock().session_count()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.index.lock().connection_count()
    }

    pub fn session_len(&self, session: &str) -> usize {
        self.inner.index.lock().session_len(session)
    }

    pub fn is_registered(&self, conn: &ConnectionHandle) -> bool {
        self.inner.index.lock().session_of(conn.id()).is_some()
    }

    /// Current channel interest of `conn`, if it is registered.
    pub fn channels_of(&self, conn: &ConnectionHandle) -> Option<HashSet<String>> {
        self.inner.index.lock().channels_of(conn.id()).cloned()
    }

    pub fn connections(&self, session: &str) -> Vec<ConnectionSummary> {
        self.inner.index.lock().summaries(session, Instant::now())
    }
}

impl<E: EventTag> GatewayInner<E> {
    /// Close and deregister one connection. Only the first of several
    /// concurrent callers does anything; the others get `false`.
    pub(crate) async fn retire(&self, handle: &ConnectionHandle, code: u16, reason: &str) -> bool {
        let claimed = self.index.lock().claim(handle.id());
        let Some(handle) = claimed else {
            return false;
        };
        self.safe_close(&handle, code, reason).await;
        self.index.lock().remove(handle.id());
        tracing::debug!("connection {} closed ({code} {reason})", handle.id());
        true
    }

    pub(crate) async fn safe_close(&self, handle: &ConnectionHandle, code: u16, reason: &str) {
        let close = handle.transport().close(code, reason);
        match tokio::time::timeout(self.config.keepalive_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.record_close_failure();
                tracing::info!("error closing connection {}: {e}", handle.id());
            }
            Err(_) => {
                self.stats.record_close_failure();
                tracing::info!("timed out closing connection {}", handle.id());
            }
        }
    }
}
