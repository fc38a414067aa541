//! Error taxonomy for the sync core
//!
//! Nothing here is fatal: diff errors are logged and the offending change is
//! dropped, validation errors abort a single local edit, and request errors
//! are handed back to whoever triggered the edit.

use serde_json::Value;
use thiserror::Error;

use crate::tree::Path;

/// Failure to walk a path through the mirrored tree
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathError {
    /// A segment names a key that is not present
    #[error("missing key '{segment}' at '{at}'")]
    MissingKey { at: Path, segment: String },

    /// An index is past the end of a sequence
    #[error("index {index} out of bounds (len {len}) at '{at}'")]
    OutOfBounds { at: Path, index: usize, len: usize },

    /// The current node is a scalar and cannot be descended into
    #[error("node at '{at}' is not a container")]
    NotAContainer { at: Path },

    /// A sequence was addressed with a non-numeric key
    #[error("sequence at '{at}' cannot be indexed by '{segment}'")]
    InvalidIndex { at: Path, segment: String },

    /// An update addressed the root itself
    #[error("path is empty after stripping the root segment")]
    Empty,
}

/// Failure to decode or apply a single diff
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    #[error("path resolution failed: {0}")]
    Path(#[from] PathError),

    #[error("unknown change type '{0}'")]
    UnknownChangeType(String),

    #[error("unknown representation '{0}'")]
    UnknownRepresentation(String),

    #[error("change is missing field '{0}'")]
    MissingField(&'static str),

    #[error("malformed change: {0}")]
    Malformed(String),
}

/// Rejection of a raw local edit against its descriptor
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: &'static str, got: Value },

    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("{value} is below the minimum of {min}")]
    BelowRange { value: f64, min: f64 },

    #[error("{value} is above the maximum of {max}")]
    AboveRange { value: f64, max: f64 },

    #[error("unknown setting type '{0}'")]
    UnknownType(String),
}

/// Failure reported by the transport collaborator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("failed to encode payload for '{channel}': {reason}")]
    Encode { channel: String, reason: String },

    #[error("transport failure: {0}")]
    Other(String),
}

/// Outcome of a request/acknowledgement exchange that did not succeed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// The correlation handle was completed (or dropped) without a reply
    #[error("no response received for '{channel}'")]
    NoResponse { channel: String },

    /// The authority replied with an error field
    #[error("remote error on '{channel}': {error}")]
    Remote { channel: String, error: Value },

    #[error("request on '{channel}' timed out after {timeout_ms}ms")]
    TimedOut { channel: String, timeout_ms: u64 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("sync session is closed")]
    SessionClosed,
}

/// Failure of a local setting edit
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingError {
    #[error("no descriptor for setting '{component}.{setting}'")]
    UnknownSetting { component: String, setting: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Request(#[from] RequestError),
}
