//! Transport seam
//!
//! The sync core does not own a network stack. It talks to a [`Transport`]
//! that provides ordered, at-least-once delivery per named channel, a
//! pub/sub surface for simple key/value topics, and a duplex request channel
//! with acknowledgements. Inbound traffic is pushed to the session as
//! [`TransportEvent`]s over an [`EventSink`].

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

use crate::ack::AckHandle;
use crate::error::TransportError;

pub mod memory;

pub use memory::{AckReply, MemoryTransport};

/// Sender side handed to a transport for inbound events
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Receiver side consumed by the sync session
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a connected sink/stream pair
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// Something the transport observed
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// A message arrived on a named channel or topic
    Message { channel: String, payload: Bytes },
}

impl TransportEvent {
    /// Convenience constructor for JSON messages
    pub fn json(channel: impl Into<String>, payload: &Value) -> Self {
        TransportEvent::Message {
            channel: channel.into(),
            payload: Bytes::from(payload.to_string()),
        }
    }
}

/// Delivery-quality token defined upstream; passed through unexamined
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryMode(String);

impl DeliveryMode {
    pub fn new(mode: impl Into<String>) -> Self {
        Self(mode.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeliveryMode {
    fn default() -> Self {
        Self("B".to_string())
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An outbound or inbound topic payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Serialized as JSON on the wire
    Json(Value),
    /// Passed through as-is
    Raw(Bytes),
}

impl Payload {
    /// Wire representation
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        match self {
            Payload::Json(value) => serde_json::to_vec(value).map(Bytes::from),
            Payload::Raw(bytes) => Ok(bytes.clone()),
        }
    }

    /// Parse a wire payload, as JSON unless `raw`
    pub fn decode(bytes: Bytes, raw: bool) -> Result<Self, serde_json::Error> {
        if raw {
            Ok(Payload::Raw(bytes))
        } else {
            serde_json::from_slice(&bytes).map(Payload::Json)
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Raw(bytes)
    }
}

/// External collaborator carrying messages to and from the authority
///
/// All methods take `&self`; implementations use interior mutability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs (e.g. "mqtt", "socket", "memory")
    fn name(&self) -> &str;

    /// Start delivering messages for `topic` as [`TransportEvent::Message`]
    async fn subscribe(&self, topic: &str, raw: bool) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish an already-encoded payload
    async fn publish(&self, topic: &str, payload: Bytes, mode: &DeliveryMode) -> Result<(), TransportError>;

    /// Send a request whose reply must be delivered through `ack`
    ///
    /// Completing `ack` without a response, or dropping it, signals that no
    /// reply will come.
    async fn send_with_ack(&self, channel: &str, payload: Value, ack: AckHandle) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_payload_encoding() {
        let payload = Payload::from(json!({"a": 1}));
        assert_eq!(payload.encode().unwrap(), Bytes::from_static(b"{\"a\":1}"));
    }

    #[test]
    fn test_raw_payload_passes_through() {
        let bytes = Bytes::from_static(b"not json");
        let payload = Payload::decode(bytes.clone(), true).unwrap();
        assert_eq!(payload.encode().unwrap(), bytes);
        assert!(payload.as_json().is_none());
    }

    #[test]
    fn test_decode_invalid_json_fails() {
        assert!(Payload::decode(Bytes::from_static(b"{"), false).is_err());
    }

    #[test]
    fn test_default_delivery_mode() {
        assert_eq!(DeliveryMode::default().as_str(), "B");
    }
}
