//! In-process loopback transport
//!
//! Records everything the session sends and lets the owner inject inbound
//! events. Requests are answered by a configurable responder, or held so the
//! owner can answer them later.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{event_channel, DeliveryMode, EventSink, EventStream, Transport, TransportEvent};
use crate::ack::AckHandle;
use crate::error::TransportError;

/// How the responder answers a request
#[derive(Debug, Clone, PartialEq)]
pub enum AckReply {
    Ack(Value),
    NoResponse,
    /// Keep the handle; answer later with [`MemoryTransport::respond_next`]
    Hold,
}

type Responder = Arc<dyn Fn(&str, &Value) -> AckReply + Send + Sync>;

/// One recorded publish
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub mode: DeliveryMode,
}

/// One recorded request
#[derive(Debug, Clone, PartialEq)]
pub struct Requested {
    pub channel: String,
    pub payload: Value,
}

#[derive(Default)]
struct Inner {
    published: Vec<Published>,
    requests: Vec<Requested>,
    subscriptions: HashMap<String, bool>,
    held: VecDeque<AckHandle>,
}

pub struct MemoryTransport {
    inner: Mutex<Inner>,
    responder: Mutex<Responder>,
    events: EventSink,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create a transport and the event stream its session should consume
    ///
    /// Requests are acknowledged with `{}` until a responder is set.
    pub fn new() -> (Arc<Self>, EventStream) {
        let (events, stream) = event_channel();
        let responder: Responder = Arc::new(|_: &str, _: &Value| AckReply::Ack(Value::Object(Default::default())));
        let transport = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            responder: Mutex::new(responder),
            events,
            closed: AtomicBool::new(false),
        });
        (transport, stream)
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> AckReply + Send + Sync + 'static,
    {
        let responder: Responder = Arc::new(responder);
        *self.responder.lock() = responder;
    }

    /// Push an inbound event to the session; false once the session is gone
    pub fn inject(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn connect(&self) -> bool {
        self.inject(TransportEvent::Connected)
    }

    pub fn disconnect(&self) -> bool {
        self.inject(TransportEvent::Disconnected)
    }

    /// Deliver a JSON message on `channel`
    pub fn deliver(&self, channel: &str, payload: &Value) -> bool {
        self.inject(TransportEvent::json(channel, payload))
    }

    /// Deliver raw bytes on `channel`
    pub fn deliver_raw(&self, channel: &str, payload: impl Into<Bytes>) -> bool {
        self.inject(TransportEvent::Message {
            channel: channel.to_string(),
            payload: payload.into(),
        })
    }

    /// Make every further call fail with [`TransportError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // held requests will never be answered now
        for handle in self.inner.lock().held.drain(..) {
            handle.no_response();
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.inner.lock().published.clone()
    }

    /// Published payloads on `topic`, decoded as UTF-8
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| String::from_utf8_lossy(&p.payload).into_owned())
            .collect()
    }

    pub fn requests(&self) -> Vec<Requested> {
        self.inner.lock().requests.clone()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.lock().subscriptions.contains_key(topic)
    }

    pub fn held_count(&self) -> usize {
        self.inner.lock().held.len()
    }

    /// Answer the oldest held request; false if none is held
    pub fn respond_next(&self, ack: Value) -> bool {
        match self.inner.lock().held.pop_front() {
            Some(handle) => {
                handle.respond(ack);
                true
            }
            None => false,
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn subscribe(&self, topic: &str, raw: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        debug!(topic, raw, "Subscribed");
        self.inner.lock().subscriptions.insert(topic.to_string(), raw);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        debug!(topic, "Unsubscribed");
        self.inner.lock().subscriptions.remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, mode: &DeliveryMode) -> Result<(), TransportError> {
        self.ensure_open()?;
        trace!(topic, bytes = payload.len(), %mode, "Published");
        self.inner.lock().published.push(Published {
            topic: topic.to_string(),
            payload,
            mode: mode.clone(),
        });
        Ok(())
    }

    async fn send_with_ack(&self, channel: &str, payload: Value, ack: AckHandle) -> Result<(), TransportError> {
        self.ensure_open()?;
        let responder = self.responder.lock().clone();
        let reply = responder(channel, &payload);

        let mut inner = self.inner.lock();
        inner.requests.push(Requested {
            channel: channel.to_string(),
            payload,
        });
        match reply {
            AckReply::Ack(value) => ack.respond(value),
            AckReply::NoResponse => ack.no_response(),
            AckReply::Hold => inner.held.push_back(ack),
        }
        Ok(())
    }
}
