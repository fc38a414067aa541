//! Mirrored state tree
//!
//! The authority owns a nested tree of mappings, sequences and scalars. This
//! module keeps a local copy of it: a full snapshot replaces the tree, then a
//! stream of add/remove/update diffs keeps it current. Bad diffs are dropped
//! one at a time so the mirror keeps making progress.

mod diff;
mod merge;
mod mirror;
mod path;
mod resolver;

pub use diff::{apply, AppliedChange, DiffOperation, Representation};
pub use merge::deep_merge;
pub use mirror::{ApplyReport, ConnectionStatus, MirrorEvent, MirrorObserver, MirrorStats, TreeMirror};
pub use path::{Path, PathSegment, ROOT_SEGMENT};
pub use resolver::{resolve, resolve_mut};

/// The mirrored tree itself: an arbitrary JSON document
pub type StateTree = serde_json::Value;

/// A fresh, disconnected tree (an empty mapping)
pub fn empty_tree() -> StateTree {
    StateTree::Object(serde_json::Map::new())
}
