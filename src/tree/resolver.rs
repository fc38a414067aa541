//! Path resolution
//!
//! Walks a [`Path`] down the tree and hands back the node it names. A leading
//! `"root"` segment is ignored. Resolution never mutates the tree, even the
//! `_mut` variant only borrows mutably so the caller can write afterwards.

use serde_json::Value;

use super::path::{Path, PathSegment};
use crate::error::PathError;

/// Resolve `path` to a shared reference into `tree`
pub fn resolve<'a>(tree: &'a Value, path: &Path) -> Result<&'a Value, PathError> {
    let segments = path.without_root();
    let mut node = tree;
    for (depth, segment) in segments.iter().enumerate() {
        node = step(node, segment, &segments[..depth])?;
    }
    Ok(node)
}

/// Resolve `path` to a mutable reference into `tree`
pub fn resolve_mut<'a>(tree: &'a mut Value, path: &Path) -> Result<&'a mut Value, PathError> {
    let segments = path.without_root();
    let mut node = tree;
    for (depth, segment) in segments.iter().enumerate() {
        node = step_mut(node, segment, &segments[..depth])?;
    }
    Ok(node)
}

fn step<'a>(
    node: &'a Value,
    segment: &PathSegment,
    walked: &[PathSegment],
) -> Result<&'a Value, PathError> {
    match node {
        Value::Object(map) => {
            let key = segment.as_key();
            map.get(&key).ok_or_else(|| PathError::MissingKey {
                at: Path::from(walked),
                segment: key,
            })
        }
        Value::Array(items) => {
            let index = sequence_index(segment, walked)?;
            items.get(index).ok_or_else(|| PathError::OutOfBounds {
                at: Path::from(walked),
                index,
                len: items.len(),
            })
        }
        _ => Err(PathError::NotAContainer {
            at: Path::from(walked),
        }),
    }
}

fn step_mut<'a>(
    node: &'a mut Value,
    segment: &PathSegment,
    walked: &[PathSegment],
) -> Result<&'a mut Value, PathError> {
    match node {
        Value::Object(map) => {
            let key = segment.as_key();
            map.get_mut(&key).ok_or_else(|| PathError::MissingKey {
                at: Path::from(walked),
                segment: key,
            })
        }
        Value::Array(items) => {
            let index = sequence_index(segment, walked)?;
            let len = items.len();
            items.get_mut(index).ok_or_else(|| PathError::OutOfBounds {
                at: Path::from(walked),
                index,
                len,
            })
        }
        _ => Err(PathError::NotAContainer {
            at: Path::from(walked),
        }),
    }
}

pub(crate) fn sequence_index(segment: &PathSegment, walked: &[PathSegment]) -> Result<usize, PathError> {
    segment.as_index().ok_or_else(|| PathError::InvalidIndex {
        at: Path::from(walked),
        segment: segment.to_string(),
    })
}
