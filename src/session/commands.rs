//! Commands accepted by the session task

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::{SettingError, TransportError};
use crate::publish::{PublishDecision, PublishStats};
use crate::settings::SettingValue;
use crate::transport::{DeliveryMode, Payload};
use crate::tree::{ConnectionStatus, MirrorObserver, MirrorStats, Path};

/// Called with `(topic, payload)` for every inbound value on a bound topic
pub type TopicCallback = Arc<dyn Fn(&str, &Payload) + Send + Sync>;

/// How a topic is bound
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicOptions {
    /// Bytes in and out, no JSON
    pub raw: bool,
    /// Delivery mode for publishes on this topic that don't name one
    pub mode: DeliveryMode,
}

/// Snapshot of session counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionStats {
    pub status: ConnectionStatus,
    pub mirror: MirrorStats,
    pub publish: PublishStats,
    pub pending_requests: usize,
}

pub(crate) enum SessionCommand {
    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------
    GetTree {
        path: Path,
        response: oneshot::Sender<Option<Value>>,
    },
    GetStats {
        response: oneshot::Sender<SessionStats>,
    },

    // -------------------------------------------------------------------------
    // Local edits
    // -------------------------------------------------------------------------
    Publish {
        topic: String,
        payload: Payload,
        /// `None` uses the bound topic's mode, else the default
        mode: Option<DeliveryMode>,
        response: oneshot::Sender<Result<PublishDecision, TransportError>>,
    },
    UpdateSetting {
        component: String,
        setting: String,
        raw: Value,
        response: oneshot::Sender<Result<SettingValue, SettingError>>,
    },

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------
    BindTopic {
        topic: String,
        options: TopicOptions,
        callback: TopicCallback,
        response: oneshot::Sender<Result<(), TransportError>>,
    },
    UnbindTopic {
        topic: String,
        response: oneshot::Sender<Result<(), TransportError>>,
    },
    Observe {
        observer: MirrorObserver,
        response: oneshot::Sender<usize>,
    },

    Shutdown,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::GetTree { path, .. } => write!(f, "GetTree({})", path),
            SessionCommand::GetStats { .. } => write!(f, "GetStats"),
            SessionCommand::Publish { topic, .. } => write!(f, "Publish({})", topic),
            SessionCommand::UpdateSetting {
                component, setting, ..
            } => write!(f, "UpdateSetting({}.{})", component, setting),
            SessionCommand::BindTopic { topic, .. } => write!(f, "BindTopic({})", topic),
            SessionCommand::UnbindTopic { topic, .. } => write!(f, "UnbindTopic({})", topic),
            SessionCommand::Observe { .. } => write!(f, "Observe"),
            SessionCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}
