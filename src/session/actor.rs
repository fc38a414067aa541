//! SyncSession - the task that owns a session's state
//!
//! ```text
//!   transport events ──┐
//!                      ├──► SyncSession ──► TreeMirror ──► observers
//!   commands ──────────┤        │
//!                      │        ├──► PublishScheduler ──► transport.publish
//!   flush deadline ────┘        └──► AckChannel (spawned) ──► transport.send_with_ack
//! ```
//!
//! Inbound events are drained before commands so a query sees every event
//! delivered before it. After [`EVENT_BATCH`] consecutive events the loop
//! gives commands and flush timers one turn, so a busy transport cannot
//! starve them.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::commands::{SessionCommand, SessionStats, TopicCallback, TopicOptions};
use super::handle::SyncSessionHandle;
use crate::ack::AckChannel;
use crate::config::SyncConfig;
use crate::error::{SettingError, TransportError};
use crate::publish::{OutboundMessage, PublishDecision, PublishScheduler};
use crate::settings::{validate, value_path, SettingDescriptor, SettingValue};
use crate::transport::{DeliveryMode, EventStream, Payload, Transport, TransportEvent};
use crate::tree::{DiffOperation, Path, TreeMirror};

/// Events handled back to back before commands and timers get a turn
pub const EVENT_BATCH: usize = 64;

struct TopicBinding {
    options: TopicOptions,
    callback: TopicCallback,
}

/// Undo for an optimistic setting edit the authority did not accept
#[derive(Debug)]
struct SettingRollback {
    path: Path,
    applied: Value,
    previous: Value,
}

pub struct SyncSession {
    config: SyncConfig,
    mirror: TreeMirror,
    scheduler: PublishScheduler,
    acks: Arc<AckChannel>,
    transport: Arc<dyn Transport>,
    topics: HashMap<String, TopicBinding>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    events: EventStream,
    events_open: bool,
    /// Consecutive events handled since commands last had a turn
    event_streak: usize,
    rollback_tx: mpsc::UnboundedSender<SettingRollback>,
    rollback_rx: mpsc::UnboundedReceiver<SettingRollback>,
    /// Zero point for the scheduler's millisecond clock
    epoch: Instant,
}

impl SyncSession {
    /// Spawn a session task consuming `events` and return its handle
    ///
    /// The task ends when every handle is dropped or `shutdown` is called.
    pub fn spawn(config: SyncConfig, transport: Arc<dyn Transport>, events: EventStream) -> SyncSessionHandle {
        let (cmd_tx, command_rx) = mpsc::unbounded_channel();
        let (rollback_tx, rollback_rx) = mpsc::unbounded_channel();

        let session = SyncSession {
            mirror: TreeMirror::new(),
            scheduler: PublishScheduler::new(config.publish_interval_ms),
            acks: Arc::new(AckChannel::new(transport.clone(), config.request_timeout())),
            transport,
            topics: HashMap::new(),
            command_rx,
            events,
            events_open: true,
            event_streak: 0,
            rollback_tx,
            rollback_rx,
            epoch: Instant::now(),
            config,
        };

        info!(
            transport = session.transport.name(),
            publish_interval_ms = session.config.publish_interval_ms,
            "Sync session spawned"
        );
        tokio::spawn(session.run());

        SyncSessionHandle::new(cmd_tx)
    }

    async fn run(mut self) {
        debug!("Sync session run loop started");

        loop {
            let deadline = self
                .scheduler
                .next_deadline()
                .map(|ms| self.epoch + Duration::from_millis(ms));

            let yielding = self.event_streak >= EVENT_BATCH;

            tokio::select! {
                biased;

                event = self.events.recv(), if self.events_open && !yielding => match event {
                    Some(event) => {
                        self.event_streak += 1;
                        self.handle_event(event);
                    }
                    None => {
                        debug!("Transport event stream closed");
                        self.events_open = false;
                    }
                },
                Some(rollback) = self.rollback_rx.recv() => {
                    self.roll_back(rollback);
                }
                cmd = self.command_rx.recv() => {
                    self.event_streak = 0;
                    match cmd {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(cmd) => {
                            trace!(?cmd, "Processing command");
                            self.handle_command(cmd).await;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.event_streak = 0;
                    self.flush_due().await;
                }
                // nothing else was ready; go back to events
                _ = std::future::ready(()), if yielding => {
                    self.event_streak = 0;
                }
            }
        }

        let stats = self.stats();
        info!(
            applied = stats.mirror.applied,
            dropped = stats.mirror.dropped,
            sent = stats.publish.sent,
            "Sync session terminated"
        );
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            status: self.mirror.status(),
            mirror: self.mirror.stats(),
            publish: self.scheduler.stats(),
            pending_requests: self.acks.pending_count(),
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("Transport connected");
                self.mirror.set_connected();
            }
            TransportEvent::Disconnected => {
                info!("Transport disconnected, resetting mirror");
                self.mirror.reset();
            }
            TransportEvent::Message { channel, payload } => self.handle_message(&channel, payload),
        }
    }

    fn handle_message(&mut self, channel: &str, payload: bytes::Bytes) {
        let channels = &self.config.channels;

        if channel == channels.init {
            if let Some(snapshot) = parse_json(channel, &payload) {
                if self.config.merge_snapshots {
                    self.mirror.merge(snapshot);
                } else {
                    self.mirror.init(snapshot);
                }
            }
        } else if channel == channels.change {
            match serde_json::from_slice::<Value>(&payload) {
                // failures are logged and counted by the mirror
                Ok(record) => {
                    let _ = self.mirror.apply_raw(&record);
                }
                Err(e) => self.mirror.drop_undecodable(channel, &e.to_string()),
            }
        } else if channel == channels.changes {
            match serde_json::from_slice::<Value>(&payload) {
                Ok(Value::Array(records)) => {
                    let report = self.mirror.apply_raw_changes(&records);
                    debug!(applied = report.applied, dropped = report.dropped, "Applied change batch");
                }
                Ok(_) => self.mirror.drop_undecodable(channel, "expected a sequence of changes"),
                Err(e) => self.mirror.drop_undecodable(channel, &e.to_string()),
            }
        } else if let Some(binding) = self.topics.get(channel) {
            match Payload::decode(payload, binding.options.raw) {
                Ok(value) => {
                    if let Err(e) = self.scheduler.observe_remote(channel, &value) {
                        warn!(channel, error = %e, "Failed to cache remote value");
                    }
                    (binding.callback)(channel, &value);
                }
                Err(e) => warn!(channel, error = %e, "Dropping undecodable topic payload"),
            }
        } else {
            trace!(channel, "Ignoring message on unbound channel");
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::GetTree { path, response } => {
                let _ = response.send(self.mirror.get(&path).cloned());
            }
            SessionCommand::GetStats { response } => {
                let _ = response.send(self.stats());
            }
            SessionCommand::Publish {
                topic,
                payload,
                mode,
                response,
            } => {
                let mode = mode
                    .or_else(|| self.topics.get(&topic).map(|b| b.options.mode.clone()))
                    .unwrap_or_default();
                let result = self.publish(&topic, &payload, mode).await;
                let _ = response.send(result);
            }
            SessionCommand::UpdateSetting {
                component,
                setting,
                raw,
                response,
            } => {
                self.update_setting(component, setting, raw, response);
            }
            SessionCommand::BindTopic {
                topic,
                options,
                callback,
                response,
            } => {
                let result = self.transport.subscribe(&topic, options.raw).await;
                if result.is_ok() {
                    debug!(topic = %topic, raw = options.raw, "Topic bound");
                    self.topics.insert(topic, TopicBinding { options, callback });
                }
                let _ = response.send(result);
            }
            SessionCommand::UnbindTopic { topic, response } => {
                self.topics.remove(&topic);
                let _ = response.send(self.transport.unsubscribe(&topic).await);
            }
            SessionCommand::Observe { observer, response } => {
                let _ = response.send(self.mirror.subscribe(observer));
            }
            // handled by the run loop
            SessionCommand::Shutdown => {}
        }
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &Payload,
        mode: DeliveryMode,
    ) -> Result<PublishDecision, TransportError> {
        let now = self.now_ms();
        let decision = self
            .scheduler
            .publish(topic, payload, mode, now)
            .map_err(|e| TransportError::Encode {
                channel: topic.to_string(),
                reason: e.to_string(),
            })?;

        if let PublishDecision::SendNow(message) = &decision {
            if let Err(e) = self.send(message).await {
                error!(topic, error = %e, "Publish failed");
                return Err(e);
            }
        }
        Ok(decision)
    }

    async fn flush_due(&mut self) {
        let now = self.now_ms();
        for message in self.scheduler.take_due(now) {
            if let Err(e) = self.send(&message).await {
                error!(topic = %message.channel, error = %e, "Flush publish failed");
            }
        }
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        debug!(topic = %message.channel, bytes = message.payload.len(), "Publishing");
        self.transport
            .publish(&message.channel, message.payload.clone(), &message.mode)
            .await
    }

    /// Validate, apply locally, then ask the authority to confirm
    ///
    /// The acknowledgement is awaited on its own task so the session keeps
    /// processing events while the request is in flight.
    fn update_setting(
        &mut self,
        component: String,
        setting: String,
        raw: Value,
        response: oneshot::Sender<Result<SettingValue, SettingError>>,
    ) {
        let value = match self.prepare_setting(&component, &setting, &raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(component = %component, setting = %setting, error = %e, "Rejected setting edit");
                let _ = response.send(Err(e));
                return;
            }
        };

        let path = value_path(&component, &setting);
        let previous = self.mirror.get(&path).cloned();
        let op = DiffOperation::Update {
            path: path.clone(),
            value: value.to_json(),
        };
        let rollback = match (self.mirror.apply_change(&op), previous) {
            (Ok(()), Some(previous)) => Some(SettingRollback {
                path,
                applied: value.to_json(),
                previous,
            }),
            (Ok(()), None) => None,
            (Err(_), _) => {
                warn!(component = %component, setting = %setting, "Setting has no local value slot, sending anyway");
                None
            }
        };

        let rollback_tx = self.rollback_tx.clone();
        let acks = self.acks.clone();
        let channel = self.config.channels.setting_update.clone();
        let payload = json!({
            "componentKey": component,
            "settingKey": setting,
            "value": value.to_json(),
        });

        tokio::spawn(async move {
            let result = match acks.request(&channel, payload).await {
                Ok(_) => {
                    info!(component = %component, setting = %setting, "Setting update acknowledged");
                    Ok(value)
                }
                Err(e) => {
                    warn!(component = %component, setting = %setting, error = %e, "Setting update failed");
                    if let Some(rollback) = rollback {
                        let _ = rollback_tx.send(rollback);
                    }
                    Err(SettingError::from(e))
                }
            };
            let _ = response.send(result);
        });
    }

    /// Restore the value a failed edit replaced
    ///
    /// Skipped when the slot no longer holds the edited value, since a newer
    /// change from the authority has already landed there.
    fn roll_back(&mut self, rollback: SettingRollback) {
        let SettingRollback { path, applied, previous } = rollback;
        if self.mirror.get(&path) != Some(&applied) {
            debug!(path = %path, "Setting changed since the failed edit, keeping current value");
            return;
        }
        info!(path = %path, "Rolling back rejected setting edit");
        let _ = self.mirror.apply_change(&DiffOperation::Update { path, value: previous });
    }

    fn prepare_setting(&self, component: &str, setting: &str, raw: &Value) -> Result<SettingValue, SettingError> {
        let descriptor = SettingDescriptor::lookup(self.mirror.tree(), component, setting)?;
        Ok(validate(raw, &descriptor)?)
    }
}

fn parse_json(channel: &str, payload: &[u8]) -> Option<Value> {
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(channel, error = %e, "Dropping malformed message");
            None
        }
    }
}
