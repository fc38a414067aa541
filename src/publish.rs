//! PublishScheduler - per-channel dedup and rate limiting for outbound publishes
//!
//! # Strategy
//!
//! 1. The payload is serialized (raw payloads pass through untouched).
//! 2. If it equals the channel's cached payload, nothing happens: no send, no
//!    timer. This is what stops a remote value from being echoed back.
//! 3. Otherwise it becomes the cached value.
//! 4. If at least one interval has passed since the channel's last send, it
//!    is sent now.
//! 5. Otherwise a flush is scheduled for the end of the interval, unless one
//!    is already pending. When the flush fires, whatever is cached at that
//!    moment is sent (trailing-edge coalescing).
//!
//! The scheduler does no I/O and keeps no clock: callers pass the current
//! time in milliseconds and perform the sends it hands back.

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::transport::{DeliveryMode, Payload};

/// Minimum spacing between two sends on the same channel
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 100;

/// A send the caller should perform
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub channel: String,
    pub payload: Bytes,
    pub mode: DeliveryMode,
}

/// What `publish` decided
#[derive(Debug, Clone, PartialEq)]
pub enum PublishDecision {
    /// Send this right away
    SendNow(OutboundMessage),
    /// Cached; a flush has been scheduled for `flush_at`
    Scheduled { flush_at: u64 },
    /// Cached; overwrites the value an already-scheduled flush will send
    Coalesced,
    /// Identical to the cached payload; dropped
    Duplicate,
}

impl PublishDecision {
    pub fn is_send(&self) -> bool {
        matches!(self, PublishDecision::SendNow(_))
    }
}

/// Per-channel bookkeeping, created on first use
#[derive(Debug, Clone)]
struct PublishRecord {
    cached: Bytes,
    mode: DeliveryMode,
    last_sent_ms: Option<u64>,
    flush_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    pub sent: u64,
    pub duplicates: u64,
    pub coalesced: u64,
}

#[derive(Debug)]
pub struct PublishScheduler {
    interval_ms: u64,
    records: HashMap<String, PublishRecord>,
    stats: PublishStats,
}

impl PublishScheduler {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            records: HashMap::new(),
            stats: PublishStats::default(),
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Offer a payload for `channel` at time `now_ms`
    pub fn publish(
        &mut self,
        channel: &str,
        payload: &Payload,
        mode: DeliveryMode,
        now_ms: u64,
    ) -> Result<PublishDecision, serde_json::Error> {
        let encoded = payload.encode()?;

        if self.records.get(channel).is_some_and(|r| r.cached == encoded) {
            self.stats.duplicates += 1;
            trace!(channel, "Skipping publish: payload unchanged");
            return Ok(PublishDecision::Duplicate);
        }

        let record = self
            .records
            .entry(channel.to_string())
            .or_insert_with(|| PublishRecord {
                cached: Bytes::new(),
                mode: DeliveryMode::default(),
                last_sent_ms: None,
                flush_at: None,
            });
        record.cached = encoded;
        record.mode = mode;

        let next_allowed = record.last_sent_ms.map(|ts| ts.saturating_add(self.interval_ms));
        match next_allowed {
            Some(at) if now_ms < at => {
                if record.flush_at.is_some() {
                    self.stats.coalesced += 1;
                    trace!(channel, "Coalescing into pending flush");
                    Ok(PublishDecision::Coalesced)
                } else {
                    record.flush_at = Some(at);
                    debug!(channel, flush_at = at, "Rate limited, flush scheduled");
                    Ok(PublishDecision::Scheduled { flush_at: at })
                }
            }
            _ => {
                record.last_sent_ms = Some(now_ms);
                self.stats.sent += 1;
                Ok(PublishDecision::SendNow(OutboundMessage {
                    channel: channel.to_string(),
                    payload: record.cached.clone(),
                    mode: record.mode.clone(),
                }))
            }
        }
    }

    /// Record a value that arrived from the authority on `channel`
    ///
    /// Republishing the same value afterwards is treated as a duplicate, so a
    /// remote change reflected into local state is not echoed back upstream.
    /// The authority's value also supersedes any local value still waiting
    /// for a flush, so the pending flush is cancelled.
    pub fn observe_remote(&mut self, channel: &str, payload: &Payload) -> Result<(), serde_json::Error> {
        let encoded = payload.encode()?;
        match self.records.get_mut(channel) {
            Some(record) => {
                if record.flush_at.take().is_some() {
                    debug!(channel, "Remote value supersedes pending flush");
                }
                record.cached = encoded;
            }
            None => {
                self.records.insert(
                    channel.to_string(),
                    PublishRecord {
                        cached: encoded,
                        mode: DeliveryMode::default(),
                        last_sent_ms: None,
                        flush_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    /// Earliest scheduled flush, if any
    pub fn next_deadline(&self) -> Option<u64> {
        self.records.values().filter_map(|r| r.flush_at).min()
    }

    /// Fire every flush due at `now_ms`, returning the sends to perform
    ///
    /// Flushes always send the currently cached value, even if it matches
    /// what was sent last.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<OutboundMessage> {
        let mut due = Vec::new();
        for (channel, record) in self.records.iter_mut() {
            match record.flush_at {
                Some(at) if at <= now_ms => {
                    record.flush_at = None;
                    record.last_sent_ms = Some(now_ms);
                    due.push(OutboundMessage {
                        channel: channel.clone(),
                        payload: record.cached.clone(),
                        mode: record.mode.clone(),
                    });
                }
                _ => {}
            }
        }
        self.stats.sent += due.len() as u64;
        due
    }

    pub fn has_pending(&self, channel: &str) -> bool {
        self.records.get(channel).is_some_and(|r| r.flush_at.is_some())
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }
}

impl Default for PublishScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLISH_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn publish(s: &mut PublishScheduler, channel: &str, value: serde_json::Value, now: u64) -> PublishDecision {
        s.publish(channel, &Payload::Json(value), DeliveryMode::default(), now)
            .unwrap()
    }

    #[test]
    fn test_first_publish_sends_immediately() {
        let mut s = PublishScheduler::default();
        let decision = publish(&mut s, "t", json!(1), 1_000);
        assert_eq!(
            decision,
            PublishDecision::SendNow(OutboundMessage {
                channel: "t".into(),
                payload: Bytes::from_static(b"1"),
                mode: DeliveryMode::default(),
            })
        );
    }

    #[test]
    fn test_identical_payload_sent_once() {
        let mut s = PublishScheduler::default();
        assert!(publish(&mut s, "t", json!({"v": 1}), 1_000).is_send());
        assert_eq!(publish(&mut s, "t", json!({"v": 1}), 5_000), PublishDecision::Duplicate);
        assert_eq!(s.next_deadline(), None);
        assert_eq!(s.stats(), PublishStats { sent: 1, duplicates: 1, coalesced: 0 });
    }

    #[test]
    fn test_burst_coalesces_to_last_value() {
        let mut s = PublishScheduler::default();
        assert!(publish(&mut s, "t", json!(0), 1_000).is_send());

        assert_eq!(publish(&mut s, "t", json!(1), 1_010), PublishDecision::Scheduled { flush_at: 1_100 });
        assert_eq!(publish(&mut s, "t", json!(2), 1_020), PublishDecision::Coalesced);
        assert_eq!(publish(&mut s, "t", json!(3), 1_090), PublishDecision::Coalesced);

        assert!(s.take_due(1_099).is_empty());
        let due = s.take_due(1_100);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload, Bytes::from_static(b"3"));
        assert!(!s.has_pending("t"));
    }

    #[test]
    fn test_send_allowed_after_interval() {
        let mut s = PublishScheduler::new(100);
        assert!(publish(&mut s, "t", json!(1), 0).is_send());
        assert!(publish(&mut s, "t", json!(2), 100).is_send());
    }

    #[test]
    fn test_flush_resets_interval() {
        let mut s = PublishScheduler::new(100);
        publish(&mut s, "t", json!(1), 0);
        publish(&mut s, "t", json!(2), 50);
        assert_eq!(s.take_due(100).len(), 1);
        // last send was the flush at 100
        assert_eq!(publish(&mut s, "t", json!(3), 150), PublishDecision::Scheduled { flush_at: 200 });
    }

    #[test]
    fn test_channels_are_independent() {
        let mut s = PublishScheduler::default();
        assert!(publish(&mut s, "a", json!(1), 0).is_send());
        assert!(publish(&mut s, "b", json!(1), 1).is_send());
        publish(&mut s, "a", json!(2), 10);
        assert!(s.has_pending("a"));
        assert!(!s.has_pending("b"));
        assert_eq!(s.next_deadline(), Some(100));
    }

    #[test]
    fn test_flush_sends_even_if_value_returned_to_last_sent() {
        let mut s = PublishScheduler::default();
        publish(&mut s, "t", json!("a"), 0);
        publish(&mut s, "t", json!("b"), 10);
        publish(&mut s, "t", json!("a"), 20);
        let due = s.take_due(100);
        assert_eq!(due[0].payload, Bytes::from_static(b"\"a\""));
    }

    #[test]
    fn test_remote_value_is_not_echoed() {
        let mut s = PublishScheduler::default();
        s.observe_remote("lasers/brightness", &Payload::Json(json!(200))).unwrap();
        assert_eq!(
            publish(&mut s, "lasers/brightness", json!(200), 0),
            PublishDecision::Duplicate
        );
        // a genuinely new local value still goes out immediately
        assert!(publish(&mut s, "lasers/brightness", json!(180), 1).is_send());
    }

    #[test]
    fn test_remote_value_cancels_pending_flush() {
        let mut s = PublishScheduler::default();
        assert!(publish(&mut s, "vol", json!(1), 0).is_send());
        assert_eq!(publish(&mut s, "vol", json!(2), 10), PublishDecision::Scheduled { flush_at: 100 });

        s.observe_remote("vol", &Payload::Json(json!(80))).unwrap();
        assert!(!s.has_pending("vol"));
        assert_eq!(s.next_deadline(), None);
        assert!(s.take_due(200).is_empty());

        // echoing the remote value is still suppressed
        assert_eq!(publish(&mut s, "vol", json!(80), 300), PublishDecision::Duplicate);
    }

    #[test]
    fn test_raw_payloads_compare_bytewise() {
        let mut s = PublishScheduler::default();
        let raw = Payload::Raw(Bytes::from_static(b"\x01\x02"));
        assert!(s.publish("r", &raw, DeliveryMode::default(), 0).unwrap().is_send());
        assert_eq!(
            s.publish("r", &raw, DeliveryMode::default(), 500).unwrap(),
            PublishDecision::Duplicate
        );
    }
}
