#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use fanoutserver::bus::InMemoryBus;
use fanoutserver::config::GatewayConfig;
use fanoutserver::gateway::registry::EventRegistry;
use fanoutserver::gateway::session::ConnectionHandle;
use fanoutserver::gateway::Gateway;
use fanoutserver::publisher::Publisher;
use fanoutserver::routes;
use fanoutserver::state::AppState;
use fanoutserver::transport::{Connection, TransportError};
use http::{Method, Request};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// How a [`MockConnection`] answers a keepalive ping.
#[derive(Clone, Debug)]
pub enum PongMode {
    /// Reply with this frame.
    Reply(String),
    /// Never reply.
    Silent,
}

/// In-process stand-in for a client socket that records everything the
/// gateway does to it.
pub struct MockConnection {
    sent: Mutex<Vec<String>>,
    closes: Mutex<Vec<(u16, String)>>,
    accepts: AtomicUsize,
    pong: Mutex<PongMode>,
    fail_sends: AtomicBool,
    held: AtomicBool,
    release: Notify,
    closes_held: AtomicBool,
    close_release: Notify,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Self::with_pong(PongMode::Reply(r#"{"type":"pong"}"#.to_string()))
    }

    pub fn silent() -> Arc<Self> {
        Self::with_pong(PongMode::Silent)
    }

    pub fn with_pong(pong: PongMode) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            accepts: AtomicUsize::new(0),
            pong: Mutex::new(pong),
            fail_sends: AtomicBool::new(false),
            held: AtomicBool::new(false),
            release: Notify::new(),
            closes_held: AtomicBool::new(false),
            close_release: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Make every following `send_text` fail.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Block every `send_text` until [`MockConnection::release_sends`].
    pub fn hold_sends(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_sends(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    /// Block every `close` until [`MockConnection::release_closes`].
    pub fn hold_closes(&self) {
        self.closes_held.store(true, Ordering::SeqCst);
    }

    pub fn release_closes(&self) {
        self.closes_held.store(false, Ordering::SeqCst);
        self.close_release.notify_one();
    }

    pub fn set_pong(&self, pong: PongMode) {
        *self.pong.lock() = pong;
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Frames sent other than keepalive pings.
    pub fn events(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|frame| frame.as_str() != fanoutserver::gateway::events::PING_FRAME)
            .cloned()
            .collect()
    }

    pub fn pings(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|frame| frame.as_str() == fanoutserver::gateway::events::PING_FRAME)
            .count()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().clone()
    }

    pub fn close_code(&self) -> Option<u16> {
        self.closes.lock().first().map(|(code, _)| *code)
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn accept(&self) -> Result<(), TransportError> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive_text(&self) -> Result<String, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let pong = self.pong.lock().clone();
        match pong {
            PongMode::Reply(frame) => Ok(frame),
            PongMode::Silent => std::future::pending().await,
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("broken pipe".to_string()));
        }
        while self.held.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        while self.closes_held.load(Ordering::SeqCst) {
            self.close_release.notified().await;
        }
        self.closes.lock().push((code, reason.to_string()));
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A mock connection together with the handle the gateway tracks it by.
pub fn mock_handle() -> (Arc<MockConnection>, ConnectionHandle) {
    let conn = MockConnection::new();
    let handle = ConnectionHandle::new(conn.clone());
    (conn, handle)
}

pub fn silent_handle() -> (Arc<MockConnection>, ConnectionHandle) {
    let conn = MockConnection::silent();
    let handle = ConnectionHandle::new(conn.clone());
    (conn, handle)
}

/// A bus, a gateway on top of it and a publisher, wired the way the server
/// wires them.
pub struct TestGateway {
    pub bus: Arc<InMemoryBus>,
    pub gateway: Arc<Gateway>,
    pub publisher: Publisher,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default(), EventRegistry::unrestricted())
    }

    pub fn with_config(config: GatewayConfig, registry: EventRegistry<String>) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let gateway = Arc::new(Gateway::new(bus.clone(), config, registry));
        let publisher = Publisher::new(bus.clone());
        Self {
            bus,
            gateway,
            publisher,
        }
    }

    /// Create and start.
    pub async fn started() -> Self {
        let gw = Self::new();
        gw.gateway.start().await.expect("failed to start gateway");
        gw
    }

    pub async fn started_with(config: GatewayConfig, registry: EventRegistry<String>) -> Self {
        let gw = Self::with_config(config, registry);
        gw.gateway.start().await.expect("failed to start gateway");
        gw
    }

    pub fn state(&self) -> AppState {
        AppState {
            gateway: Arc::clone(&self.gateway),
            publisher: self.publisher.clone(),
        }
    }

    /// Returns an Axum Router wired to this gateway for `oneshot()` calls.
    pub fn router(&self) -> axum::Router {
        routes::router(self.state())
    }

    /// Binds a TCP listener on port 0, spawns the server, and returns the
    /// `host:port` it listens on.
    pub async fn spawn(&self) -> String {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("127.0.0.1:{}", addr.port())
    }

    /// Publish `{event, data}` to `channel` through the publisher.
    pub async fn publish(&self, channel: &str, event: &str, data: serde_json::Value) -> usize {
        let data = data.as_object().cloned().unwrap_or_default();
        self.publisher
            .publish(channel, event.to_string(), data, serde_json::Map::new())
            .await
            .expect("publish failed")
    }
}

/// Poll `check` until it holds or `timeout` elapses. Returns the final result.
pub async fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let spawned tasks (listener, writers) drain what is already queued.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ---------------------------------------------------------------------------
// Request builder helpers
// ---------------------------------------------------------------------------

/// Build a request with a JSON body.
pub fn json_request(method: Method, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Build a request with no body.
pub fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parse a response body into a `serde_json::Value`.
pub async fn parse_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
