//! Request/acknowledgement over the duplex channel
//!
//! Each request gets a correlation id and a single-shot [`AckHandle`] that
//! the transport completes when the authority replies. The pending entry
//! lives exactly as long as the request future.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::RequestError;
use crate::transport::Transport;

/// Default bound on how long a request waits for its acknowledgement
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Correlation handle passed to the transport with each request
#[derive(Debug)]
pub struct AckHandle {
    id: u64,
    tx: oneshot::Sender<Option<Value>>,
}

impl AckHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver the authority's reply
    pub fn respond(self, ack: Value) {
        let _ = self.tx.send(Some(ack));
    }

    /// Signal that no reply will arrive (e.g. channel closed)
    pub fn no_response(self) {
        let _ = self.tx.send(None);
    }
}

#[derive(Debug)]
struct PendingAck {
    channel: String,
    sent_at: Instant,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingAck>>>;

/// Removes the pending entry however the request future ends
struct PendingGuard {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.pending.lock().remove(&self.id) {
            trace!(
                id = self.id,
                channel = %entry.channel,
                elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                "Pending request closed"
            );
        }
    }
}

/// Single-shot request/acknowledgement exchanges over a transport
pub struct AckChannel {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: PendingMap,
    timeout: Option<Duration>,
}

impl AckChannel {
    /// `timeout: None` waits for an acknowledgement indefinitely
    pub fn new(transport: Arc<dyn Transport>, timeout: Option<Duration>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Send `payload` on `channel` and wait for the acknowledgement
    pub async fn request(&self, channel: &str, payload: Value) -> Result<Value, RequestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.pending.lock().insert(
            id,
            PendingAck {
                channel: channel.to_string(),
                sent_at: Instant::now(),
            },
        );
        let _guard = PendingGuard {
            id,
            pending: self.pending.clone(),
        };

        debug!(id, channel, transport = self.transport.name(), "Sending request");
        self.transport
            .send_with_ack(channel, payload, AckHandle { id, tx })
            .await?;

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(id, channel, "Request timed out");
                    return Err(RequestError::TimedOut {
                        channel: channel.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        match reply {
            Ok(Some(ack)) => match remote_error(&ack) {
                Some(error) => Err(RequestError::Remote {
                    channel: channel.to_string(),
                    error,
                }),
                None => Ok(ack),
            },
            // explicit "no response" or the handle was dropped
            Ok(None) | Err(_) => Err(RequestError::NoResponse {
                channel: channel.to_string(),
            }),
        }
    }

    /// Number of requests still awaiting an acknowledgement
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

fn remote_error(ack: &Value) -> Option<Value> {
    match ack.get("error") {
        None | Some(Value::Null) => None,
        Some(error) => Some(error.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AckReply, MemoryTransport};
    use serde_json::json;

    #[tokio::test]
    async fn test_resolves_with_ack() {
        let (transport, _events) = MemoryTransport::new();
        transport.set_responder(|_, payload| AckReply::Ack(json!({"ok": true, "echo": payload})));
        let acks = AckChannel::new(transport.clone(), None);

        let ack = acks.request("setting:update", json!({"v": 1})).await.unwrap();
        assert_eq!(ack, json!({"ok": true, "echo": {"v": 1}}));
        assert_eq!(acks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_field_rejects() {
        let (transport, _events) = MemoryTransport::new();
        transport.set_responder(|_, _| AckReply::Ack(json!({"error": "out of range"})));
        let acks = AckChannel::new(transport.clone(), None);

        let err = acks.request("setting:update", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::Remote {
                channel: "setting:update".into(),
                error: json!("out of range")
            }
        );
    }

    #[tokio::test]
    async fn test_null_error_field_is_success() {
        let (transport, _events) = MemoryTransport::new();
        transport.set_responder(|_, _| AckReply::Ack(json!({"error": null})));
        let acks = AckChannel::new(transport.clone(), None);
        assert!(acks.request("c", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_response_rejects() {
        let (transport, _events) = MemoryTransport::new();
        transport.set_responder(|_, _| AckReply::NoResponse);
        let acks = AckChannel::new(transport.clone(), None);

        let err = acks.request("c", json!({})).await.unwrap_err();
        assert_eq!(err, RequestError::NoResponse { channel: "c".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_the_wait() {
        let (transport, _events) = MemoryTransport::new();
        transport.set_responder(|_, _| AckReply::Hold);
        let acks = AckChannel::new(transport.clone(), Some(Duration::from_millis(250)));

        let err = acks.request("c", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::TimedOut {
                channel: "c".into(),
                timeout_ms: 250
            }
        );
        assert_eq!(acks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_held_request_resolves_later() {
        let (transport, _events) = MemoryTransport::new();
        transport.set_responder(|_, _| AckReply::Hold);
        let acks = Arc::new(AckChannel::new(transport.clone(), None));

        let task = {
            let acks = acks.clone();
            tokio::spawn(async move { acks.request("c", json!({"n": 1})).await })
        };

        // wait until the transport has the handle
        while transport.held_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(acks.pending_count(), 1);
        assert!(transport.respond_next(json!({"done": true})));

        assert_eq!(task.await.unwrap().unwrap(), json!({"done": true}));
        assert_eq!(acks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_transport_fails_request() {
        let (transport, _events) = MemoryTransport::new();
        transport.close();
        let acks = AckChannel::new(transport.clone(), None);
        assert!(matches!(
            acks.request("c", json!({})).await,
            Err(RequestError::Transport(_))
        ));
    }
}
