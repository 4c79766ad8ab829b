//! Persistence integration tests over the public root surface.
//!
//! Tests verify that:
//! - a saved flow reloads into a graph that computes the same outputs
//! - runtime state (outputs, indicators) never reaches the saved form
//! - editor metadata (`@` attributes, `#custom`) rides along untouched
//! - flows survive process boundaries through file storage
//! - external storage changes live-update loaded flows in place

mod common;

use serde_json::json;

use common::RunLog;
use trellis_core::prelude::*;

fn sum_chain() -> serde_json::Value {
    json!({
        "sum": {"#is": "test:sum", "a": 2, "b": 3},
        "twice": {"#is": "test:sum", "~a": "##.sum.#output", "~b": "##.sum.#output"}
    })
}

#[test]
fn save_then_load_reproduces_outputs() {
    let log = RunLog::default();
    let mut root = common::test_root(&log);
    root.add_flow("f", Some(&sum_chain())).unwrap();
    root.run_all(8);
    assert_eq!(root.value_at("f.sum.#output").unwrap().as_f64(), Some(5.0));
    assert_eq!(root.value_at("f.twice.#output").unwrap().as_f64(), Some(10.0));

    let saved = root.save_flow("f").unwrap();
    // Saved form: `#is` leads each block, bindings keep their `~` form, and
    // computed outputs stay out.
    let sum = saved["sum"].as_object().unwrap();
    assert_eq!(sum.keys().next().map(String::as_str), Some("#is"));
    assert_eq!(sum["a"], json!(2));
    assert!(sum.get("#output").is_none());
    assert_eq!(saved["twice"]["~a"], json!("##.sum.#output"));

    let mut reloaded = common::test_root(&log);
    reloaded.add_flow("f", Some(&saved)).unwrap();
    reloaded.run_all(8);
    assert_eq!(
        reloaded.value_at("f.twice.#output").unwrap().as_f64(),
        Some(10.0)
    );
}

#[test]
fn attributes_and_custom_descriptors_ride_along() {
    let log = RunLog::default();
    let mut root = common::test_root(&log);
    root.add_flow(
        "f",
        Some(&json!({
            "b": {
                "#is": "test:recorder",
                "@b-xyw": [120, 80, 150],
                "#custom": [{"name": "extra", "type": "string"}],
                "input": 1,
            },
        })),
    )
    .unwrap();
    root.run_all(4);
    log.lock().clear();

    let saved = root.save_flow("f").unwrap();
    assert_eq!(saved["b"]["@b-xyw"], json!([120, 80, 150]));
    assert_eq!(
        saved["b"]["#custom"],
        json!([{"name": "extra", "type": "string"}])
    );

    // Editor metadata moves without waking the function.
    root.set_value_at("f.b.@b-xyw", Value::data(json!([0, 0, 150])))
        .unwrap();
    root.run_all(4);
    assert!(log.lock().is_empty());
}

#[test]
fn flows_survive_a_root_through_file_storage() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();
    {
        let storage = FileStorage::new(dir.path()).unwrap();
        let mut root = common::test_root(&log).with_storage(storage);
        root.add_flow("f", Some(&sum_chain())).unwrap();
        root.run_all(8);
    }

    let storage = FileStorage::new(dir.path()).unwrap();
    let mut root = common::test_root(&log).with_storage(storage);
    assert_eq!(root.flow_names(), vec!["f"]);
    root.run_all(8);
    assert_eq!(root.value_at("f.twice.#output").unwrap().as_f64(), Some(10.0));
}

#[test]
fn storage_changes_recompute_loaded_flows_in_place() {
    let store = MemoryStorage::new();
    let log = RunLog::default();
    let mut root = common::test_root(&log).with_storage(store.clone());
    root.add_flow("f", Some(&sum_chain())).unwrap();
    root.run_all(8);
    assert_eq!(root.value_at("f.twice.#output").unwrap().as_f64(), Some(10.0));
    let sum_block = root.block_at("f.sum").unwrap();

    let mut changed = root.save_flow("f").unwrap();
    changed["sum"]["a"] = json!(7);
    store.save("f", &changed.to_string()).unwrap();

    assert!(!root.is_idle());
    root.run_all(8);
    assert_eq!(root.value_at("f.sum.a").unwrap().as_i64(), Some(7));
    assert_eq!(root.value_at("f.twice.#output").unwrap().as_f64(), Some(20.0));
    // The block was updated where it stood, not torn down and remade.
    assert_eq!(root.block_at("f.sum").unwrap(), sum_block);
}
