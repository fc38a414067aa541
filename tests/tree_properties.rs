//! Property tests for diff application

use proptest::prelude::*;
use serde_json::{Map, Value};

use state_mirror::tree::{apply, resolve, DiffOperation, Path, PathSegment, Representation, ROOT_SEGMENT};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::String),
    ]
}

fn any_tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// An object tree plus one key that exists at its top level
fn object_with_key() -> impl Strategy<Value = (Value, String)> {
    prop::collection::btree_map("[a-d]", any_tree(), 1..4).prop_flat_map(|m| {
        let keys: Vec<String> = m.keys().cloned().collect();
        let obj = Value::Object(m.into_iter().collect());
        (Just(obj), prop::sample::select(keys))
    })
}

proptest! {
    #[test]
    fn update_twice_equals_update_once((tree, key) in object_with_key(), value in leaf()) {
        let op = DiffOperation::Update { path: Path::new([key.as_str()]), value: value.clone() };

        let mut once = tree.clone();
        apply(&mut once, &op).unwrap();
        let mut twice = once.clone();
        apply(&mut twice, &op).unwrap();

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(resolve(&once, &Path::new([key.as_str()])).unwrap(), &value);
    }

    #[test]
    fn removing_absent_key_is_noop(tree in prop::collection::btree_map("[a-d]", any_tree(), 0..4)) {
        let mut tree = Value::Object(tree.into_iter().collect());
        let before = tree.clone();
        let op = DiffOperation::Remove { path: Path::root(), key: PathSegment::from("zz") };

        apply(&mut tree, &op).unwrap();
        prop_assert_eq!(tree, before);
    }

    #[test]
    fn root_prefix_is_transparent((tree, key) in object_with_key(), value in leaf()) {
        let bare = Path::new([key.as_str()]);
        let rooted = Path::new([ROOT_SEGMENT, key.as_str()]);
        prop_assert_eq!(resolve(&tree, &bare), resolve(&tree, &rooted));

        let mut a = tree.clone();
        let mut b = tree;
        apply(&mut a, &DiffOperation::Update { path: bare, value: value.clone() }).unwrap();
        apply(&mut b, &DiffOperation::Update { path: rooted, value }).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn add_then_remove_restores_tree(tree in prop::collection::btree_map("[a-d]", any_tree(), 0..4), value in leaf()) {
        let mut tree = Value::Object(tree.into_iter().collect());
        let before = tree.clone();

        apply(&mut tree, &DiffOperation::Add {
            path: Path::root(),
            key: PathSegment::from("new"),
            repr: Representation::Atomic(value.clone()),
        }).unwrap();
        prop_assert_eq!(resolve(&tree, &Path::new(["new"])).unwrap(), &value);

        apply(&mut tree, &DiffOperation::Remove { path: Path::root(), key: PathSegment::from("new") }).unwrap();
        prop_assert_eq!(tree, before);
    }

    #[test]
    fn decoded_records_never_panic(record in any_tree()) {
        let _ = DiffOperation::from_value(&record);
    }
}
