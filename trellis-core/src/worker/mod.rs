//! Fan-out over pooled worker scopes.
//!
//! A fan-out block runs a worker template once per key of its input. Each
//! slot handed out by the [`WorkerPool`] becomes a runtime child block
//! named `#worker-{slot}`; the template is loaded into it, the key's input
//! lands under its `#inputs` scope, and the slot is considered finished
//! when `#outputs.value` inside it holds a ready value. Worker scopes are
//! runtime children, so saving the fan-out block never captures them.
//!
//! [`map`] maps one input snapshot per change and emits an aggregate once
//! every key finishes. [`multi`] keeps one worker alive per key for as long
//! as the key exists in a live source.

mod map;
mod multi;
mod pool;

pub use pool::{ResizeOutcome, WorkerPool};

use serde_json::Value as JsonValue;

use crate::func::{FuncDesc, FuncMode, PropDesc, PropType, Registry};
use crate::graph::engine::Engine;
use crate::graph::naming;
use crate::types::BlockId;
use crate::value::Value;

/// Register the fan-out functions. Part of the core set every root carries.
pub(crate) fn register(registry: &mut Registry) {
    let map_desc = FuncDesc::new("map")
        .mode(FuncMode::OnLoad)
        .category("repeat")
        .prop(PropDesc::new("input", PropType::Any).pinned())
        .prop(PropDesc::new("template", PropType::Object))
        .prop(PropDesc::new("poolSize", PropType::Number))
        .prop(PropDesc::new("timeout", PropType::Number))
        .prop(PropDesc::new("reuseWorker", PropType::String));
    let multi_desc = FuncDesc::new("multi")
        .mode(FuncMode::OnLoad)
        .category("repeat")
        .prop(PropDesc::new("input", PropType::Any).pinned())
        .prop(PropDesc::new("template", PropType::Object));
    // The core descriptors are well formed; registration cannot fail.
    let _ = registry.register(map_desc, || Box::new(map::MapFunction::default()));
    let _ = registry.register(multi_desc, || Box::new(multi::MultiFunction::default()));
}

/// How much worker state survives between fan-out passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ReusePolicy {
    /// Destroy every worker scope once its key finishes.
    #[default]
    None,
    /// Keep worker scopes warm but reload the template into them, so a
    /// later pass starts from template state.
    Reuse,
    /// Keep worker scopes and their computed state; a later pass with the
    /// same key resumes where the previous one ended.
    Persist,
}

impl ReusePolicy {
    pub fn from_value(value: &Value) -> Self {
        match value.as_str() {
            Some("reuse") => Self::Reuse,
            Some("persist") => Self::Persist,
            _ => Self::None,
        }
    }

    pub fn keeps_workers(self) -> bool {
        !matches!(self, Self::None)
    }
}

pub(crate) fn worker_name(slot: usize) -> String {
    format!("#worker-{slot}")
}

/// Relative path, from the fan-out block, of a slot's completion property.
pub(crate) fn output_path(slot: usize) -> String {
    format!("#worker-{slot}.#outputs.value")
}

/// Whether a worker output counts as finished. Wait sentinels keep the slot
/// in flight; errors finish it like any other result.
pub(crate) fn is_ready(value: &Value) -> bool {
    match value {
        Value::Absent => false,
        Value::Event(ev) => !ev.is_wait(),
        _ => true,
    }
}

/// JSON form of one worker's output for the aggregated emission. Error
/// sentinels become `{"#error": message}` so a failed key stays visible in
/// the aggregate next to its finished siblings.
pub(crate) fn output_json(value: &Value) -> JsonValue {
    match value {
        Value::Data(data) => data.as_ref().clone(),
        Value::Event(ev) => match ev.error_message() {
            Some(msg) => serde_json::json!({ "#error": msg }),
            None => JsonValue::Null,
        },
        Value::Absent | Value::Block(_) => JsonValue::Null,
    }
}

/// Get or create a runtime child block under `owner`.
fn ensure_child(engine: &mut Engine, owner: BlockId, name: &str) -> Option<BlockId> {
    if let Some(block) = engine.child_block(owner, name) {
        return Some(block);
    }
    engine.create_block_runtime(owner, name).ok()
}

/// Create the worker scope for `slot` and load the template into it. The
/// `#outputs` child always exists afterwards, so the completion
/// subscription resolves even for templates that never write an output.
pub(crate) fn create_worker(
    engine: &mut Engine,
    owner: BlockId,
    slot: usize,
    template: &Value,
) -> Option<BlockId> {
    let worker = engine.create_block_runtime(owner, &worker_name(slot)).ok()?;
    if let Some(data) = template.as_object() {
        engine.load_block(worker, data);
    }
    ensure_child(engine, worker, "#outputs");
    Some(worker)
}

/// Put a warm worker back to template state: live-update against the
/// template, clear the previous output, and queue the subtree's on-load
/// functions again. The live update only queues blocks whose saved data
/// changed, which a reused worker's usually has not.
pub(crate) fn reset_worker(engine: &mut Engine, worker: BlockId, template: &Value) {
    if let Some(data) = template.as_object() {
        engine.live_update_block(worker, data);
    }
    ensure_child(engine, worker, "#outputs");
    clear_worker_output(engine, worker);
    requeue_on_load(engine, worker);
}

/// Queue every runnable on-load function in `block`'s subtree, the way
/// finishing a fresh load would.
pub(crate) fn requeue_on_load(engine: &mut Engine, block: BlockId) {
    let mut stack = vec![block];
    while let Some(current) = stack.pop() {
        let queue = engine.blocks.get(current).is_some_and(|node| {
            node.func.is_some() && !node.disabled && node.effective_mode() == FuncMode::OnLoad
        });
        if queue {
            engine.queue_block(current);
        }
        if let Some(node) = engine.blocks.get(current) {
            for prop in node.props.values() {
                if let Some(child) = engine.props.get(*prop).and_then(|p| p.value.as_block()) {
                    stack.push(child);
                }
            }
        }
    }
}

pub(crate) fn clear_worker_output(engine: &mut Engine, worker: BlockId) {
    if let Some(outputs) = engine.child_block(worker, "#outputs") {
        if let Some(prop) = engine.ensure_prop(outputs, "value") {
            engine.write_runtime(prop, Value::Absent);
        }
    }
}

/// Write one key's input into a worker scope. Object inputs spread their
/// fields across the `#inputs` child; anything else lands on
/// `#inputs.value`. The key itself rides along as `#inputs.#key`, and
/// ordinary fields left over from a previous pass are cleared. Returns
/// whether any field actually changed.
pub(crate) fn write_worker_inputs(
    engine: &mut Engine,
    worker: BlockId,
    key: &str,
    input: &Value,
) -> bool {
    let Some(inputs) = ensure_child(engine, worker, "#inputs") else {
        return false;
    };
    let mut changed = false;
    if let Some(prop) = engine.ensure_prop(inputs, "#key") {
        changed |= engine.write_runtime(prop, Value::string(key));
    }
    let desired: Vec<(String, Value)> = match input.as_object() {
        Some(fields) => fields
            .iter()
            .map(|(name, v)| (name.clone(), Value::data(v.clone())))
            .collect(),
        None => vec![("value".to_string(), input.clone())],
    };
    let stale: Vec<String> = engine
        .blocks
        .get(inputs)
        .map(|node| {
            node.props
                .keys()
                .filter(|name| {
                    naming::category(name) == naming::FieldCategory::Ordinary
                        && !desired.iter().any(|(d, _)| d == name.as_ref())
                })
                .map(|name| name.to_string())
                .collect()
        })
        .unwrap_or_default();
    for name in stale {
        if let Some(prop) = engine.find_prop(inputs, &name) {
            changed |= engine.write_runtime(prop, Value::Absent);
        }
    }
    for (name, value) in desired {
        if let Some(prop) = engine.ensure_prop(inputs, &name) {
            changed |= engine.write_runtime(prop, value);
        }
    }
    changed
}

/// Destroy the worker scope behind `slot`, if it still exists. Clearing
/// the owning property tears down the whole subtree.
pub(crate) fn destroy_worker(engine: &mut Engine, owner: BlockId, slot: usize) {
    if let Some(prop) = engine.find_prop(owner, &worker_name(slot)) {
        engine.write_runtime(prop, Value::Absent);
    }
}
