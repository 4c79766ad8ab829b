//! Binding behavior across blocks, chains, and plain data.
//!
//! Tests verify that:
//! - multi-segment paths resolve through nested blocks and track changes
//! - chains drill into plain JSON values field by field
//! - `##` anchors stack and `###` jumps to the root flow
//! - bindings resolve late when the source appears after the bind
//! - rebinding moves the subscription and unbinding clears the value
//! - destroying a bound source yields Absent with exactly one notification
//! - writing an unchanged value notifies nobody

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use trellis_core::prelude::*;

#[test]
fn chain_bindings_follow_nested_blocks() {
    let mut root = Root::new();
    root.add_flow(
        "f",
        Some(&json!({
            "outer": {"#is": "", "inner": {"#is": "", "value": 5}},
            "sink": {"#is": ""},
        })),
    )
    .unwrap();

    root.set_binding_at("f.sink.input", Some("##.outer.inner.value"))
        .unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(5));

    root.set_value_at("f.outer.inner.value", Value::int(6)).unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(6));
}

#[test]
fn chains_drill_into_plain_data() {
    let mut root = Root::new();
    root.add_flow(
        "f",
        Some(&json!({
            "src": {"#is": "", "obj": {"a": {"b": 3}}},
            "sink": {"#is": ""},
        })),
    )
    .unwrap();

    root.set_binding_at("f.sink.input", Some("##.src.obj.a.b"))
        .unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(3));

    root.set_value_at("f.src.obj", Value::data(json!({"a": {"b": 9}})))
        .unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(9));
}

#[test]
fn anchors_stack_up_and_root_flow_jumps() {
    let mut root = Root::new();
    root.add_flow(
        "f",
        Some(&json!({
            "shared": 7,
            "mid": {"#is": "", "deep": {"#is": ""}},
        })),
    )
    .unwrap();

    root.set_binding_at("f.mid.deep.input", Some("###.shared"))
        .unwrap();
    root.set_binding_at("f.mid.deep.input2", Some("##.##.shared"))
        .unwrap();
    assert_eq!(root.value_at("f.mid.deep.input").unwrap().as_i64(), Some(7));
    assert_eq!(root.value_at("f.mid.deep.input2").unwrap().as_i64(), Some(7));

    root.set_value_at("f.shared", Value::int(8)).unwrap();
    assert_eq!(root.value_at("f.mid.deep.input").unwrap().as_i64(), Some(8));
    assert_eq!(root.value_at("f.mid.deep.input2").unwrap().as_i64(), Some(8));
}

#[test]
fn bindings_resolve_when_the_source_appears_later() {
    let mut root = Root::new();
    root.add_flow("f", Some(&json!({"sink": {"#is": ""}}))).unwrap();

    root.set_binding_at("f.sink.input", Some("##.later.value"))
        .unwrap();
    assert!(root.value_at("f.sink.input").unwrap().is_absent());

    root.add_flow("f.later", None).unwrap();
    root.set_value_at("f.later.value", Value::int(5)).unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(5));
}

#[test]
fn rebinding_moves_the_subscription() {
    let mut root = Root::new();
    root.add_flow(
        "f",
        Some(&json!({
            "a": {"#is": "", "v": 1},
            "b": {"#is": "", "v": 2},
            "sink": {"#is": ""},
        })),
    )
    .unwrap();

    root.set_binding_at("f.sink.input", Some("##.a.v")).unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(1));

    root.set_binding_at("f.sink.input", Some("##.b.v")).unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(2));

    // The old source no longer reaches the sink.
    root.set_value_at("f.a.v", Value::int(10)).unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(2));

    root.set_value_at("f.b.v", Value::int(3)).unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(3));
}

#[test]
fn unbinding_clears_the_value() {
    let mut root = Root::new();
    root.add_flow(
        "f",
        Some(&json!({
            "a": {"#is": "", "v": 4},
            "sink": {"#is": ""},
        })),
    )
    .unwrap();

    root.set_binding_at("f.sink.input", Some("##.a.v")).unwrap();
    assert_eq!(root.value_at("f.sink.input").unwrap().as_i64(), Some(4));

    root.set_binding_at("f.sink.input", None).unwrap();
    assert!(root.value_at("f.sink.input").unwrap().is_absent());

    // The severed source no longer reaches the sink.
    root.set_value_at("f.a.v", Value::int(9)).unwrap();
    assert!(root.value_at("f.sink.input").unwrap().is_absent());
}

#[test]
fn destroyed_source_leaves_absent_with_one_notification() {
    let mut root = Root::new();
    root.add_flow(
        "f",
        Some(&json!({
            "src": {"#is": "", "value": 3},
            "sink": {"#is": ""},
        })),
    )
    .unwrap();
    root.set_binding_at("f.sink.input", Some("##.src.value"))
        .unwrap();

    let seen: Arc<Mutex<Vec<Option<i64>>>> = Default::default();
    let log = seen.clone();
    root.watch("f.sink.input", move |value| log.lock().push(value.as_i64()))
        .unwrap();
    assert_eq!(*seen.lock(), vec![Some(3)]);

    root.set_value_at("f.src", Value::Absent).unwrap();
    assert_eq!(*seen.lock(), vec![Some(3), None]);
    assert!(root.value_at("f.sink.input").unwrap().is_absent());
}

#[test]
fn equal_writes_notify_nobody() {
    let mut root = Root::new();
    root.add_flow("f", None).unwrap();

    let seen: Arc<Mutex<Vec<Option<i64>>>> = Default::default();
    let log = seen.clone();
    root.watch("f.x", move |value| log.lock().push(value.as_i64()))
        .unwrap();

    root.set_value_at("f.x", Value::int(5)).unwrap();
    root.set_value_at("f.x", Value::int(5)).unwrap();
    root.set_value_at("f.x", Value::int(6)).unwrap();
    assert_eq!(*seen.lock(), vec![None, Some(5), Some(6)]);
}
