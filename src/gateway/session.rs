use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::transport::Connection;

/// Opaque identity assigned to a connection handle when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unregistered,
    Active,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Unregistered,
            1 => ConnectionState::Active,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Unregistered => 0,
            ConnectionState::Active => 1,
            ConnectionState::Closed => 2,
        }
    }
}

struct HandleInner {
    id: ConnectionId,
    transport: Arc<dyn Connection>,
    state: AtomicU8,
}

/// A transport plus the identity the gateway indexes it by.
///
/// Clones share identity and state. Once a handle reaches
/// [`ConnectionState::Closed`] it cannot be registered again; wrap the
/// transport in a new handle instead.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    pub fn new(transport: Arc<dyn Connection>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: ConnectionId::generate(),
                transport,
                state: AtomicU8::new(ConnectionState::Unregistered.as_u8()),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn transport(&self) -> &Arc<dyn Connection> {
        &self.inner.transport
    }

    pub(crate) fn mark_active(&self) {
        let _ = self.inner.state.compare_exchange(
            ConnectionState::Unregistered.as_u8(),
            ConnectionState::Active.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub(crate) fn mark_closed(&self) {
        self.inner
            .state
            .store(ConnectionState::Closed.as_u8(), Ordering::SeqCst);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
