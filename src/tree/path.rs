//! Paths into the mirrored tree

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel segment some messages use to address the tree root explicitly
pub const ROOT_SEGMENT: &str = "root";

/// One step of a path: a mapping key or a sequence index
///
/// On the wire a segment is either a JSON string or a non-negative integer.
/// Integers address mappings too (their key is the decimal form), and numeric
/// strings address sequences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl PathSegment {
    /// The segment as a mapping key
    pub fn as_key(&self) -> String {
        match self {
            PathSegment::Index(i) => i.to_string(),
            PathSegment::Key(k) => k.clone(),
        }
    }

    /// The segment as a sequence index, if it is one
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(k) => k.parse().ok(),
        }
    }

    fn is_root(&self) -> bool {
        matches!(self, PathSegment::Key(k) if k == ROOT_SEGMENT)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Key(k) => write!(f, "{}", k),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Ordered sequence of segments locating a node in the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// The empty path (the root node)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Segments with a leading `"root"` removed (at most once)
    pub fn without_root(&self) -> &[PathSegment] {
        match self.0.split_first() {
            Some((first, rest)) if first.is_root() => rest,
            _ => &self.0,
        }
    }

    /// Owned copy of the path with a leading `"root"` removed
    pub fn stripped(&self) -> Path {
        Path(self.without_root().to_vec())
    }

    /// A new path with `segment` appended
    pub fn child(&self, segment: impl Into<PathSegment>) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    pub fn push(&mut self, segment: impl Into<PathSegment>) {
        self.0.push(segment.into());
    }
}

impl From<Vec<PathSegment>> for Path {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl From<&[PathSegment]> for Path {
    fn from(segments: &[PathSegment]) -> Self {
        Self(segments.to_vec())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_prefix_is_stripped_once() {
        let path = Path::new(["root", "root", "a"]);
        assert_eq!(path.without_root(), Path::new(["root", "a"]).segments());
    }

    #[test]
    fn test_root_only_stripped_when_leading() {
        let path = Path::new(["a", "root"]);
        assert_eq!(path.without_root().len(), 2);
    }

    #[test]
    fn test_deserialize_mixed_segments() {
        let path: Path = serde_json::from_value(json!(["root", "lasers", 3, "color"])).unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("root".into()),
                PathSegment::Key("lasers".into()),
                PathSegment::Index(3),
                PathSegment::Key("color".into()),
            ]
        );
        assert_eq!(path.to_string(), "root.lasers.3.color");
    }

    #[test]
    fn test_segment_conversions() {
        assert_eq!(PathSegment::Index(2).as_key(), "2");
        assert_eq!(PathSegment::Key("7".into()).as_index(), Some(7));
        assert_eq!(PathSegment::Key("x".into()).as_index(), None);
    }

    #[test]
    fn test_empty_path_display() {
        assert_eq!(Path::root().to_string(), "<root>");
    }
}
