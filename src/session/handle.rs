//! SyncSessionHandle - public API for a running session
//!
//! Cheap to clone. Every method is a message to the session task; queries
//! await a oneshot reply.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::commands::{SessionCommand, SessionStats, TopicOptions};
use crate::error::{RequestError, SettingError, TransportError};
use crate::publish::PublishDecision;
use crate::settings::SettingValue;
use crate::transport::{DeliveryMode, Payload};
use crate::tree::{MirrorEvent, Path};

#[derive(Clone)]
pub struct SyncSessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SyncSessionHandle {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { cmd_tx }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Copy of the whole mirrored tree
    pub async fn tree(&self) -> Option<Value> {
        self.get(Path::root()).await
    }

    /// Copy of the node at `path`, `None` if absent or the session is gone
    pub async fn get(&self, path: Path) -> Option<Value> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx.send(SessionCommand::GetTree { path, response }).ok()?;
        rx.await.ok().flatten()
    }

    pub async fn stats(&self) -> Option<SessionStats> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx.send(SessionCommand::GetStats { response }).ok()?;
        rx.await.ok()
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Publish on a pub/sub topic
    ///
    /// Uses the topic's bound delivery mode, or the default for unbound topics.
    pub async fn publish(&self, topic: &str, payload: impl Into<Payload>) -> Result<PublishDecision, TransportError> {
        self.send_publish(topic, payload.into(), None).await
    }

    pub async fn publish_with(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        mode: DeliveryMode,
    ) -> Result<PublishDecision, TransportError> {
        self.send_publish(topic, payload.into(), Some(mode)).await
    }

    async fn send_publish(
        &self,
        topic: &str,
        payload: Payload,
        mode: Option<DeliveryMode>,
    ) -> Result<PublishDecision, TransportError> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Publish {
                topic: topic.to_string(),
                payload,
                mode,
                response,
            })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Validate `raw`, apply it locally and send it to the authority
    ///
    /// Resolves once the authority has acknowledged (or rejected) the edit.
    pub async fn update_setting(&self, component: &str, setting: &str, raw: Value) -> Result<SettingValue, SettingError> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::UpdateSetting {
                component: component.to_string(),
                setting: setting.to_string(),
                raw,
                response,
            })
            .map_err(|_| RequestError::SessionClosed)?;
        rx.await.map_err(|_| RequestError::SessionClosed)?
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to `topic`; inbound values are passed to `callback`
    ///
    /// Values received this way are remembered, so publishing the same value
    /// back is suppressed.
    pub async fn bind_topic<F>(&self, topic: &str, options: TopicOptions, callback: F) -> Result<(), TransportError>
    where
        F: Fn(&str, &Payload) + Send + Sync + 'static,
    {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::BindTopic {
                topic: topic.to_string(),
                options,
                callback: Arc::new(callback),
                response,
            })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    pub async fn unbind_topic(&self, topic: &str) -> Result<(), TransportError> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::UnbindTopic {
                topic: topic.to_string(),
                response,
            })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Register a mirror observer, returning its index
    pub async fn observe<F>(&self, observer: F) -> Option<usize>
    where
        F: Fn(&MirrorEvent) + Send + Sync + 'static,
    {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Observe {
                observer: Arc::new(observer),
                response,
            })
            .ok()?;
        rx.await.ok()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Fire-and-forget
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<SyncSessionHandle>();
    }

    #[tokio::test]
    async fn test_closed_session_reports_errors() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = SyncSessionHandle::new(tx);

        assert!(!handle.is_alive());
        assert_eq!(handle.tree().await, None);
        assert_eq!(
            handle.publish("t", Value::Null).await.unwrap_err(),
            TransportError::Closed
        );
        assert_eq!(
            handle.update_setting("c", "s", Value::Null).await.unwrap_err(),
            SettingError::Request(RequestError::SessionClosed)
        );
    }
}
