use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{oneshot, Mutex};

use super::{Connection, TransportError};

/// Gateway-facing half of an upgraded axum WebSocket.
///
/// The socket's read half stays with the route handler, which is the only
/// reader. Inbound frames are handed back through [`WsConnection::deliver_inbound`]
/// and satisfy whichever `receive_text` call is pending at that moment.
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    waiter: parking_lot::Mutex<Option<oneshot::Sender<String>>>,
    closed: AtomicBool,
}

impl WsConnection {
    pub fn split(socket: WebSocket) -> (Arc<Self>, SplitStream<WebSocket>) {
        let (sink, stream) = socket.split();
        let conn = Arc::new(Self {
            sink: Mutex::new(sink),
            waiter: parking_lot::Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        (conn, stream)
    }

    /// Hand an inbound text frame to a pending `receive_text`, if any.
    pub fn deliver_inbound(&self, text: &str) {
        if let Some(tx) = self.waiter.lock().take() {
            let _ = tx.send(text.to_string());
        }
    }

    /// Record that the peer went away. Pending and future receives fail.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.waiter.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn accept(&self) -> Result<(), TransportError> {
        // axum completes the handshake before the upgrade callback runs.
        Ok(())
    }

    async fn receive_text(&self) -> Result<String, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        *self.waiter.lock() = Some(tx);
        if self.is_closed() {
            self.waiter.lock().take();
            return Err(TransportError::Closed);
        }
        rx.await.map_err(|_| TransportError::Closed)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Ok(());
        }
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let result = self
            .sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()));
        self.mark_closed();
        result
    }
}
