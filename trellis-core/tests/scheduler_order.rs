//! Scheduler ordering end to end, driven through paths and bindings.
//!
//! Tests verify that:
//! - equal-priority blocks run in the order they were triggered
//! - explicit `#priority` values decide the run order, not trigger order
//! - work surfacing at a lower level preempts parked higher-level entries
//! - a block re-queued mid-pass runs before older entries at its level
//! - `#sync` blocks run inline on the triggering write

mod common;

use common::{test_root, RunLog};
use serde_json::json;
use trellis_core::prelude::*;

#[test]
fn priority_overrides_beat_trigger_order() {
    let log: RunLog = Default::default();
    let mut root = test_root(&log);
    root.add_flow(
        "f",
        Some(&json!({
            "p0": {"#is": "test:recorder"},
            "p1": {"#is": "test:recorder"},
            "p2": {"#is": "test:recorder"},
            "p3": {"#is": "test:recorder"},
        })),
    )
    .unwrap();
    root.run_all(4);
    assert!(log.lock().is_empty());

    // All four at the default priority: first trigger runs first.
    for name in ["p3", "p0", "p1", "p2"] {
        root.set_value_at(&format!("f.{name}.input"), Value::int(1))
            .unwrap();
    }
    root.run();
    assert_eq!(*log.lock(), ["p3", "p0", "p1", "p2"]);
    log.lock().clear();

    root.set_value_at("f.p1.#priority", Value::int(1)).unwrap();
    root.set_value_at("f.p3.#priority", Value::int(3)).unwrap();
    root.set_value_at("f.p0.#priority", Value::int(0)).unwrap();
    root.set_value_at("f.p2.#priority", Value::int(2)).unwrap();
    // Re-trigger in a scrambled order; the levels decide, not the triggers.
    for name in ["p3", "p1", "p2", "p0"] {
        root.set_value_at(&format!("f.{name}.input"), Value::int(2))
            .unwrap();
    }
    root.run();
    assert_eq!(*log.lock(), ["p0", "p1", "p2", "p3"]);
}

#[test]
fn lower_priority_work_preempts_pending_higher_levels() {
    let log: RunLog = Default::default();
    let mut root = test_root(&log);
    // p1 feeds p2's input, and that same input feeds p0. One trigger on p1
    // therefore queues p2 (level 2) and p0 (level 0) in the same pass.
    root.add_flow(
        "f",
        Some(&json!({
            "p0": {"#is": "test:recorder", "#priority": 0, "~input": "##.p2.input"},
            "p1": {"#is": "test:recorder", "#priority": 1},
            "p2": {"#is": "test:recorder", "#priority": 2, "~input": "##.p1.#output"},
        })),
    )
    .unwrap();
    root.run_all(4);
    assert!(log.lock().is_empty());

    root.set_value_at("f.p1.input", Value::int(1)).unwrap();
    root.run();
    assert_eq!(*log.lock(), ["p1", "p0", "p2"]);
    assert_eq!(root.value_at("f.p0.#output").unwrap().as_i64(), Some(1));
}

#[test]
fn requeued_work_runs_before_parked_same_level_entries() {
    let log: RunLog = Default::default();
    let mut root = test_root(&log);
    // a, b, c share a level; b's output feeds back into a's input, so b's
    // run re-queues a while c is still parked.
    root.add_flow(
        "f",
        Some(&json!({
            "a": {"#is": "test:recorder", "~input": "##.b.#output"},
            "b": {"#is": "test:recorder"},
            "c": {"#is": "test:recorder"},
        })),
    )
    .unwrap();
    root.run_all(4);
    assert!(log.lock().is_empty());

    root.set_value_at("f.a.poke", Value::int(1)).unwrap();
    root.set_value_at("f.b.input", Value::int(7)).unwrap();
    root.set_value_at("f.c.input", Value::int(1)).unwrap();
    root.run();
    assert_eq!(*log.lock(), ["a", "b", "a", "c"]);
    assert_eq!(root.value_at("f.a.#output").unwrap().as_i64(), Some(7));
}

#[test]
fn sync_blocks_run_inline_on_write() {
    let log: RunLog = Default::default();
    let mut root = test_root(&log);
    root.add_flow(
        "f",
        Some(&json!({
            "s": {"#is": "test:recorder", "#sync": true},
        })),
    )
    .unwrap();
    assert!(log.lock().is_empty());

    root.set_value_at("f.s.input", Value::int(5)).unwrap();
    // The write itself ran the block; no scheduler pass in between.
    assert_eq!(*log.lock(), ["s"]);
    assert_eq!(root.value_at("f.s.#output").unwrap().as_i64(), Some(5));
    assert!(root.is_idle());
}
