use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Value of the `destination` field that marks a bus payload for fan-out.
pub const FANOUT_DESTINATION: &str = "ws_event";

/// Keepalive probe sent to idle connections.
pub const PING_FRAME: &str = r#"{"type":"ping"}"#;

/// Close codes.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const KEEPALIVE_TIMEOUT: u16 = 1001;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const SERVER_SHUTDOWN: u16 = 10001;
}

const RESERVED_FIELDS: &[&str] = &["destination", "event", "data"];

fn fanout_destination() -> String {
    FANOUT_DESTINATION.to_string()
}

/// Event envelope carried on the bus and delivered to clients.
///
/// `E` is the event tag type. Use a closed enum to restrict tags at decode
/// time, or the default `String` to accept anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E = String> {
    #[serde(default = "fanout_destination")]
    pub destination: String,
    pub event: E,
    pub data: Map<String, Value>,
    /// Additional top-level fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload is not addressed to the fan-out gateway")]
    NotFanOut,
    #[error("payload does not match the envelope schema: {0}")]
    Invalid(serde_json::Error),
    #[error("envelope could not be serialized: {0}")]
    Encode(serde_json::Error),
}

impl<E> EventEnvelope<E> {
    pub fn new(event: E, data: Map<String, Value>) -> Self {
        Self {
            destination: fanout_destination(),
            event,
            data,
            extra: Map::new(),
        }
    }

    /// Attach extra top-level fields. Keys that collide with the envelope's
    /// own fields are ignored.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        for (key, value) in extra {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                tracing::debug!("ignoring reserved envelope field {key:?} in extras");
                continue;
            }
            self.extra.insert(key, value);
        }
        self
    }

    pub fn is_fan_out(&self) -> bool {
        self.destination == FANOUT_DESTINATION
    }
}

impl<E: Serialize> EventEnvelope<E> {
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }
}

impl<E: DeserializeOwned> EventEnvelope<E> {
    /// Decode a raw bus payload, requiring the fan-out destination marker.
    pub fn decode(raw: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(raw).map_err(EnvelopeError::Malformed)?;
        let object = value.as_object().ok_or(EnvelopeError::NotAnObject)?;
        if object.get("destination").and_then(Value::as_str) != Some(FANOUT_DESTINATION) {
            return Err(EnvelopeError::NotFanOut);
        }
        serde_json::from_value(value).map_err(EnvelopeError::Invalid)
    }
}

/// Control frames a client may send over its socket.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
}
