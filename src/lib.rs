//! State mirror - local copy of a remote controller's state tree
//!
//! The controller emits a full snapshot followed by incremental diffs; this
//! crate keeps a consistent mirror of that tree, validates local setting
//! edits before they go upstream, and rate-limits outbound publishes so a
//! remote change is never echoed back as if it were new.

pub mod ack;
pub mod config;
pub mod error;
pub mod logging;
pub mod publish;
pub mod session;
pub mod settings;
pub mod transport;
pub mod tree;

pub use ack::{AckChannel, AckHandle};
pub use config::SyncConfig;
pub use error::{DiffError, PathError, RequestError, SettingError, TransportError, ValidationError};
pub use publish::{PublishDecision, PublishScheduler};
pub use session::{SyncSession, SyncSessionHandle, TopicOptions};
pub use settings::{validate, SettingDescriptor, SettingType, SettingValue};
pub use transport::{DeliveryMode, MemoryTransport, Payload, Transport, TransportEvent};
pub use tree::{DiffOperation, Path, PathSegment, StateTree, TreeMirror};
