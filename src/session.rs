//! Sync session - one connection's worth of mirror state
//!
//! A session owns exactly one [`TreeMirror`](crate::tree::TreeMirror), one
//! [`PublishScheduler`](crate::publish::PublishScheduler) and one
//! [`AckChannel`](crate::ack::AckChannel). Inbound transport events, flush
//! timers and local commands are handled one at a time by the session task,
//! so none of that state needs a lock. Sessions share nothing, so any number
//! of them can run side by side.

mod actor;
mod commands;
mod handle;

pub use actor::{SyncSession, EVENT_BATCH};
pub use commands::{SessionStats, TopicCallback, TopicOptions};
pub use handle::SyncSessionHandle;
