//! Incremental changes against the mirrored tree
//!
//! Wire format (one record per change):
//!
//! ```text
//! {"change_type": "add",    "path": [...], "key": k, "repr": "atomic"|"list"|"dict", "value": v?}
//! {"change_type": "remove", "path": [...], "key": k}
//! {"change_type": "update", "path": [..., k], "value": v}
//! ```
//!
//! For `add`/`remove` the path names the parent container. For `update` the
//! last path segment is the key being overwritten.

use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use tracing::trace;

use super::path::{Path, PathSegment};
use super::resolver::{resolve_mut, sequence_index};
use crate::error::{DiffError, PathError};

/// Shape of a child created by an `add`
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    /// A scalar (or any literal value) supplied with the change
    Atomic(Value),
    /// A fresh empty sequence
    List,
    /// A fresh empty mapping
    Dict,
}

impl Representation {
    fn into_value(self) -> Value {
        match self {
            Representation::Atomic(value) => value,
            Representation::List => Value::Array(Vec::new()),
            Representation::Dict => Value::Object(Map::new()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Representation::Atomic(_) => "atomic",
            Representation::List => "list",
            Representation::Dict => "dict",
        }
    }
}

/// One incremental change
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOperation {
    Add {
        path: Path,
        key: PathSegment,
        repr: Representation,
    },
    Remove {
        path: Path,
        key: PathSegment,
    },
    Update {
        path: Path,
        value: Value,
    },
}

/// Where a change landed, and what is there now (`None` after a remove)
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    pub path: Path,
    pub value: Option<Value>,
}

#[derive(Deserialize)]
struct RawChange {
    change_type: String,
    path: Path,
    #[serde(default)]
    key: Option<PathSegment>,
    #[serde(default)]
    repr: Option<String>,
    #[serde(default, deserialize_with = "present")]
    value: Option<Value>,
}

/// Distinguishes `"value": null` (present) from a missing field
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl DiffOperation {
    /// Decode a change record as sent by the authority
    pub fn from_value(value: &Value) -> Result<Self, DiffError> {
        let raw = RawChange::deserialize(value).map_err(|e| DiffError::Malformed(e.to_string()))?;

        match raw.change_type.as_str() {
            "add" => {
                let key = raw.key.ok_or(DiffError::MissingField("key"))?;
                let repr = match raw.repr.as_deref() {
                    Some("atomic") => {
                        Representation::Atomic(raw.value.ok_or(DiffError::MissingField("value"))?)
                    }
                    Some("list") => Representation::List,
                    Some("dict") => Representation::Dict,
                    Some(other) => return Err(DiffError::UnknownRepresentation(other.to_string())),
                    None => return Err(DiffError::MissingField("repr")),
                };
                Ok(DiffOperation::Add {
                    path: raw.path,
                    key,
                    repr,
                })
            }
            "remove" => Ok(DiffOperation::Remove {
                path: raw.path,
                key: raw.key.ok_or(DiffError::MissingField("key"))?,
            }),
            "update" => Ok(DiffOperation::Update {
                path: raw.path,
                value: raw.value.ok_or(DiffError::MissingField("value"))?,
            }),
            other => Err(DiffError::UnknownChangeType(other.to_string())),
        }
    }

    /// Encode back into the wire record
    pub fn to_value(&self) -> Value {
        match self {
            DiffOperation::Add { path, key, repr } => {
                let mut record = json!({
                    "change_type": "add",
                    "path": path,
                    "key": key,
                    "repr": repr.name(),
                });
                if let Representation::Atomic(value) = repr {
                    record["value"] = value.clone();
                }
                record
            }
            DiffOperation::Remove { path, key } => json!({
                "change_type": "remove",
                "path": path,
                "key": key,
            }),
            DiffOperation::Update { path, value } => json!({
                "change_type": "update",
                "path": path,
                "value": value,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            DiffOperation::Add { path, .. }
            | DiffOperation::Remove { path, .. }
            | DiffOperation::Update { path, .. } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DiffOperation::Add { .. } => "add",
            DiffOperation::Remove { .. } => "remove",
            DiffOperation::Update { .. } => "update",
        }
    }
}

/// Apply one change to `tree`
///
/// On error the tree is untouched.
pub fn apply(tree: &mut Value, op: &DiffOperation) -> Result<AppliedChange, DiffError> {
    match op {
        DiffOperation::Update { path, value } => {
            let segments = path.without_root();
            let (key, parent_segments) = segments.split_last().ok_or(PathError::Empty)?;
            let parent_path = Path::from(parent_segments);
            let parent = resolve_mut(tree, &parent_path)?;
            set_child(parent, key, value.clone(), parent_segments)?;
            trace!(path = %path, "Applied update");
            Ok(AppliedChange {
                path: parent_path.child(key.clone()),
                value: Some(value.clone()),
            })
        }
        DiffOperation::Add { path, key, repr } => {
            let parent = resolve_mut(tree, path)?;
            let value = repr.clone().into_value();
            set_child(parent, key, value.clone(), path.without_root())?;
            trace!(path = %path, key = %key, repr = repr.name(), "Applied add");
            Ok(AppliedChange {
                path: path.stripped().child(key.clone()),
                value: Some(value),
            })
        }
        DiffOperation::Remove { path, key } => {
            let parent = resolve_mut(tree, path)?;
            remove_child(parent, key, path.without_root())?;
            trace!(path = %path, key = %key, "Applied remove");
            Ok(AppliedChange {
                path: path.stripped().child(key.clone()),
                value: None,
            })
        }
    }
}

fn set_child(
    parent: &mut Value,
    key: &PathSegment,
    value: Value,
    at: &[PathSegment],
) -> Result<(), PathError> {
    match parent {
        Value::Object(map) => {
            map.insert(key.as_key(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = sequence_index(key, at)?;
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[index] = value,
                std::cmp::Ordering::Equal => items.push(value),
                std::cmp::Ordering::Greater => {
                    return Err(PathError::OutOfBounds {
                        at: Path::from(at),
                        index,
                        len: items.len(),
                    })
                }
            }
            Ok(())
        }
        _ => Err(PathError::NotAContainer { at: Path::from(at) }),
    }
}

/// Removing something that is not there is fine
fn remove_child(parent: &mut Value, key: &PathSegment, at: &[PathSegment]) -> Result<(), PathError> {
    match parent {
        Value::Object(map) => {
            map.remove(&key.as_key());
            Ok(())
        }
        Value::Array(items) => {
            if let Some(index) = key.as_index() {
                if index < items.len() {
                    items.remove(index);
                }
            }
            Ok(())
        }
        _ => Err(PathError::NotAContainer { at: Path::from(at) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(value: Value) -> DiffOperation {
        DiffOperation::from_value(&value).unwrap()
    }

    #[test]
    fn test_update_overwrites_last_segment() {
        let mut tree = json!({"a": {"b": 1}});
        let applied = apply(
            &mut tree,
            &op(json!({"change_type": "update", "path": ["a", "b"], "value": 2})),
        )
        .unwrap();
        assert_eq!(tree, json!({"a": {"b": 2}}));
        assert_eq!(applied.path, Path::new(["a", "b"]));
        assert_eq!(applied.value, Some(json!(2)));
    }

    #[test]
    fn test_update_with_root_prefix() {
        let mut tree = json!({"a": {"b": 1}});
        apply(
            &mut tree,
            &op(json!({"change_type": "update", "path": ["root", "a", "b"], "value": null})),
        )
        .unwrap();
        assert_eq!(tree, json!({"a": {"b": null}}));
    }

    #[test]
    fn test_add_list_and_dict() {
        let mut tree = json!({"a": {"b": 2}});
        apply(
            &mut tree,
            &op(json!({"change_type": "add", "path": ["a"], "key": "c", "repr": "list"})),
        )
        .unwrap();
        apply(
            &mut tree,
            &op(json!({"change_type": "add", "path": ["root"], "key": "d", "repr": "dict"})),
        )
        .unwrap();
        assert_eq!(tree, json!({"a": {"b": 2, "c": []}, "d": {}}));
    }

    #[test]
    fn test_add_atomic_appends_to_sequence() {
        let mut tree = json!({"a": [1]});
        apply(
            &mut tree,
            &op(json!({"change_type": "add", "path": ["a"], "key": 1, "repr": "atomic", "value": 5})),
        )
        .unwrap();
        assert_eq!(tree, json!({"a": [1, 5]}));
    }

    #[test]
    fn test_add_past_end_of_sequence_fails() {
        let mut tree = json!({"a": []});
        let err = apply(
            &mut tree,
            &op(json!({"change_type": "add", "path": ["a"], "key": 3, "repr": "atomic", "value": 5})),
        )
        .unwrap_err();
        assert!(matches!(err, DiffError::Path(PathError::OutOfBounds { .. })));
        assert_eq!(tree, json!({"a": []}));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut tree = json!({"a": {"b": 1, "c": 2}});
        let remove = op(json!({"change_type": "remove", "path": ["a"], "key": "b"}));
        apply(&mut tree, &remove).unwrap();
        apply(&mut tree, &remove).unwrap();
        assert_eq!(tree, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_remove_from_sequence() {
        let mut tree = json!({"a": [1, 2, 3]});
        apply(&mut tree, &op(json!({"change_type": "remove", "path": ["a"], "key": 1}))).unwrap();
        assert_eq!(tree, json!({"a": [1, 3]}));
    }

    #[test]
    fn test_missing_parent_leaves_tree_untouched() {
        let mut tree = json!({"a": {"b": 1}});
        let err = apply(
            &mut tree,
            &op(json!({"change_type": "update", "path": ["x", "y"], "value": 1})),
        )
        .unwrap_err();
        assert!(matches!(err, DiffError::Path(PathError::MissingKey { .. })));
        assert_eq!(tree, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_update_of_root_is_rejected() {
        let mut tree = json!({});
        let err = apply(
            &mut tree,
            &op(json!({"change_type": "update", "path": ["root"], "value": 1})),
        )
        .unwrap_err();
        assert_eq!(err, DiffError::Path(PathError::Empty));
    }

    #[test]
    fn test_decode_errors() {
        let unknown_type = json!({"change_type": "rename", "path": []});
        assert_eq!(
            DiffOperation::from_value(&unknown_type).unwrap_err(),
            DiffError::UnknownChangeType("rename".into())
        );

        let unknown_repr = json!({"change_type": "add", "path": [], "key": "k", "repr": "set"});
        assert_eq!(
            DiffOperation::from_value(&unknown_repr).unwrap_err(),
            DiffError::UnknownRepresentation("set".into())
        );

        let no_value = json!({"change_type": "update", "path": ["a"]});
        assert_eq!(
            DiffOperation::from_value(&no_value).unwrap_err(),
            DiffError::MissingField("value")
        );

        let no_path = json!({"change_type": "update", "value": 1});
        assert!(matches!(
            DiffOperation::from_value(&no_path).unwrap_err(),
            DiffError::Malformed(_)
        ));
    }

    #[test]
    fn test_wire_record_round_trips() {
        let record = json!({"change_type": "add", "path": ["a"], "key": "c", "repr": "atomic", "value": [1]});
        assert_eq!(op(record.clone()).to_value(), record);
    }
}
