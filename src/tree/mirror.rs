//! TreeMirror - owner of the local copy of the authority's tree
//!
//! Created empty and disconnected. A snapshot replaces (or merges into) the
//! whole tree, diffs are applied strictly in the order given, and a
//! disconnect resets everything. Observers hear about every structural change.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::diff::{apply, AppliedChange, DiffOperation};
use super::merge::deep_merge;
use super::path::Path;
use super::resolver::resolve;
use super::{empty_tree, StateTree};
use crate::error::DiffError;

/// Callback invoked for every mirror event
pub type MirrorObserver = Arc<dyn Fn(&MirrorEvent) + Send + Sync>;

/// Connection state of the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

/// What observers are told
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// The tree was (re)built from a snapshot
    Initialized,
    /// One diff landed at `path`; `value` is `None` after a remove
    Changed { path: Path, value: Option<Value> },
    /// The tree was cleared
    Reset,
}

/// Counters for applied and dropped changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub snapshots: u64,
    pub applied: u64,
    pub dropped: u64,
}

/// Result of applying a batch of changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub dropped: usize,
}

pub struct TreeMirror {
    tree: StateTree,
    status: ConnectionStatus,
    observers: Vec<MirrorObserver>,
    stats: MirrorStats,
}

impl TreeMirror {
    pub fn new() -> Self {
        Self {
            tree: empty_tree(),
            status: ConnectionStatus::Disconnected,
            observers: Vec::new(),
            stats: MirrorStats::default(),
        }
    }

    /// Replace the whole tree with `snapshot` and mark the mirror connected
    pub fn init(&mut self, snapshot: Value) {
        self.tree = snapshot;
        self.status = ConnectionStatus::Connected;
        self.stats.snapshots += 1;
        info!("Mirror initialized from snapshot");
        self.notify(&MirrorEvent::Initialized);
    }

    /// Deep-merge a partial snapshot into the current tree
    pub fn merge(&mut self, snapshot: Value) {
        deep_merge(&mut self.tree, snapshot);
        self.status = ConnectionStatus::Connected;
        self.stats.snapshots += 1;
        debug!("Partial snapshot merged into mirror");
        self.notify(&MirrorEvent::Initialized);
    }

    /// Apply one change
    ///
    /// A failed change is logged, counted and otherwise ignored; the error is
    /// returned for callers that want to inspect it.
    pub fn apply_change(&mut self, op: &DiffOperation) -> Result<(), DiffError> {
        match apply(&mut self.tree, op) {
            Ok(AppliedChange { path, value }) => {
                self.stats.applied += 1;
                self.notify(&MirrorEvent::Changed { path, value });
                Ok(())
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!(change = op.kind(), path = %op.path(), error = %e, "Dropping change");
                Err(e)
            }
        }
    }

    /// Apply changes strictly in order, continuing past failures
    pub fn apply_changes<'a, I>(&mut self, ops: I) -> ApplyReport
    where
        I: IntoIterator<Item = &'a DiffOperation>,
    {
        let mut report = ApplyReport::default();
        for op in ops {
            match self.apply_change(op) {
                Ok(()) => report.applied += 1,
                Err(_) => report.dropped += 1,
            }
        }
        report
    }

    /// Decode and apply one wire record
    pub fn apply_raw(&mut self, record: &Value) -> Result<(), DiffError> {
        let op = DiffOperation::from_value(record).map_err(|e| {
            self.stats.dropped += 1;
            warn!(error = %e, "Dropping undecodable change");
            e
        })?;
        self.apply_change(&op)
    }

    /// Decode and apply a sequence of wire records, preserving order
    pub fn apply_raw_changes(&mut self, records: &[Value]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for record in records {
            match self.apply_raw(record) {
                Ok(()) => report.applied += 1,
                Err(_) => report.dropped += 1,
            }
        }
        report
    }

    /// Count a change message that never decoded into records
    ///
    /// Covers payloads that are not JSON or not a sequence of changes.
    pub fn drop_undecodable(&mut self, channel: &str, reason: &str) {
        self.stats.dropped += 1;
        warn!(channel, reason, "Dropping undecodable change message");
    }

    /// Clear to the disconnected initial state
    pub fn reset(&mut self) {
        self.tree = empty_tree();
        self.status = ConnectionStatus::Disconnected;
        info!("Mirror reset");
        self.notify(&MirrorEvent::Reset);
    }

    pub fn set_connected(&mut self) {
        self.status = ConnectionStatus::Connected;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Look up the node at `path`, if it exists
    pub fn get(&self, path: &Path) -> Option<&Value> {
        resolve(&self.tree, path).ok()
    }

    pub fn stats(&self) -> MirrorStats {
        self.stats
    }

    /// Register an observer, returning its index
    pub fn subscribe(&mut self, observer: MirrorObserver) -> usize {
        self.observers.push(observer);
        self.observers.len() - 1
    }

    fn notify(&self, event: &MirrorEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }
}

impl Default for TreeMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recording_mirror() -> (TreeMirror, Arc<Mutex<Vec<MirrorEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut mirror = TreeMirror::new();
        mirror.subscribe(Arc::new(move |event: &MirrorEvent| sink.lock().push(event.clone())));
        (mirror, events)
    }

    #[test]
    fn test_starts_empty_and_disconnected() {
        let mirror = TreeMirror::new();
        assert_eq!(mirror.tree(), &json!({}));
        assert_eq!(mirror.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_snapshot_then_update() {
        let (mut mirror, events) = recording_mirror();
        mirror.init(json!({"a": {"b": 1}}));
        assert!(mirror.is_connected());

        mirror
            .apply_raw(&json!({"change_type": "update", "path": ["a", "b"], "value": 2}))
            .unwrap();
        assert_eq!(mirror.tree(), &json!({"a": {"b": 2}}));

        let events = events.lock();
        assert_eq!(events[0], MirrorEvent::Initialized);
        assert_eq!(
            events[1],
            MirrorEvent::Changed {
                path: Path::new(["a", "b"]),
                value: Some(json!(2))
            }
        );
    }

    #[test]
    fn test_bad_change_is_dropped_and_stream_continues() {
        let (mut mirror, events) = recording_mirror();
        mirror.init(json!({"a": {"b": 2}}));

        let report = mirror.apply_raw_changes(&[
            json!({"change_type": "update", "path": ["x", "y"], "value": 1}),
            json!({"change_type": "add", "path": ["a"], "key": "c", "repr": "list"}),
            json!({"change_type": "bogus", "path": []}),
        ]);

        assert_eq!(report, ApplyReport { applied: 1, dropped: 2 });
        assert_eq!(mirror.tree(), &json!({"a": {"b": 2, "c": []}}));
        assert_eq!(mirror.stats(), MirrorStats { snapshots: 1, applied: 1, dropped: 2 });
        // Initialized + one Changed
        assert_eq!(events.lock().len(), 2);
    }

    #[test]
    fn test_undecodable_message_counts_as_dropped() {
        let (mut mirror, events) = recording_mirror();
        mirror.init(json!({"a": 1}));
        mirror.drop_undecodable("state:changes", "expected a sequence");

        assert_eq!(mirror.stats().dropped, 1);
        assert_eq!(mirror.tree(), &json!({"a": 1}));
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_changes_apply_in_order() {
        let mut mirror = TreeMirror::new();
        mirror.init(json!({}));
        let ops: Vec<DiffOperation> = [
            json!({"change_type": "add", "path": [], "key": "k", "repr": "dict"}),
            json!({"change_type": "add", "path": ["k"], "key": "v", "repr": "atomic", "value": 1}),
            json!({"change_type": "update", "path": ["k", "v"], "value": 2}),
            json!({"change_type": "remove", "path": ["k"], "key": "v"}),
            json!({"change_type": "add", "path": ["k"], "key": "w", "repr": "atomic", "value": 3}),
        ]
        .iter()
        .map(|r| DiffOperation::from_value(r).unwrap())
        .collect();

        let report = mirror.apply_changes(&ops);
        assert_eq!(report.applied, 5);
        assert_eq!(mirror.tree(), &json!({"k": {"w": 3}}));
    }

    #[test]
    fn test_merge_keeps_unrelated_keys() {
        let mut mirror = TreeMirror::new();
        mirror.init(json!({"a": {"b": 1}, "c": 1}));
        mirror.merge(json!({"a": {"d": 2}}));
        assert_eq!(mirror.tree(), &json!({"a": {"b": 1, "d": 2}, "c": 1}));
    }

    #[test]
    fn test_reset_clears_tree() {
        let (mut mirror, events) = recording_mirror();
        mirror.init(json!({"a": 1}));
        mirror.reset();
        assert_eq!(mirror.tree(), &json!({}));
        assert_eq!(mirror.status(), ConnectionStatus::Disconnected);
        assert_eq!(events.lock().last(), Some(&MirrorEvent::Reset));
    }

    #[test]
    fn test_get_resolves_paths() {
        let mut mirror = TreeMirror::new();
        mirror.init(json!({"a": {"b": [1, 2]}}));
        assert_eq!(mirror.get(&Path::new(["root", "a", "b"])), Some(&json!([1, 2])));
        assert_eq!(mirror.get(&Path::new(["nope"])), None);
    }
}
