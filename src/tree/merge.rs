//! Typed deep merge for partial snapshots
//!
//! Rules: scalar leaves are replaced, matching container kinds (mapping into
//! mapping, sequence into sequence) are merged recursively, anything else is
//! overwritten by the incoming value.

use serde_json::Value;

/// Merge `incoming` into `target` in place
pub fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(existing), Value::Array(incoming)) => {
            for (index, value) in incoming.into_iter().enumerate() {
                match existing.get_mut(index) {
                    Some(slot) => deep_merge(slot, value),
                    None => existing.push(value),
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_recurses_into_mappings() {
        let mut tree = json!({"a": {"b": 1, "c": 2}, "keep": true});
        deep_merge(&mut tree, json!({"a": {"b": 5, "d": 3}}));
        assert_eq!(tree, json!({"a": {"b": 5, "c": 2, "d": 3}, "keep": true}));
    }

    #[test]
    fn test_merge_overwrites_mismatched_kinds() {
        let mut tree = json!({"a": {"b": 1}, "s": [1, 2]});
        deep_merge(&mut tree, json!({"a": 7, "s": {"x": 1}}));
        assert_eq!(tree, json!({"a": 7, "s": {"x": 1}}));
    }

    #[test]
    fn test_merge_sequences_by_index() {
        let mut tree = json!({"s": [{"on": false}, 2]});
        deep_merge(&mut tree, json!({"s": [{"level": 3}, 4, 5]}));
        assert_eq!(tree, json!({"s": [{"on": false, "level": 3}, 4, 5]}));
    }
}
