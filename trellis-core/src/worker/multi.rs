//! Multi-worker fan-out: one persistent worker per key of a live source.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::func::{FuncContext, Function, RunResult};
use crate::graph::naming;
use crate::types::BlockId;
use crate::value::{DataMap, Value};
use crate::worker::{
    create_worker, destroy_worker, output_json, output_path, worker_name,
    write_worker_inputs, WorkerPool,
};

/// Tag for child-structure notifications from a watched source block.
/// Worker slots count up from zero and never reach it.
const TAG_SOURCE: u64 = u64::MAX;

/// Runs the worker template once per key of a live source and keeps each
/// worker alive for as long as its key exists. The source is either a data
/// object, whose fields are the keys, or a block, whose child blocks are.
/// Per-key output updates within one scheduler pass coalesce into a single
/// aggregated emission.
pub(crate) struct MultiFunction {
    pool: WorkerPool,
    /// Live keys to their slots, in the order the keys appeared.
    active: IndexMap<String, usize>,
    watched_source: Option<BlockId>,
    template: Value,
}

impl Default for MultiFunction {
    fn default() -> Self {
        Self {
            pool: WorkerPool::unbounded(),
            active: IndexMap::new(),
            watched_source: None,
            template: Value::Absent,
        }
    }
}

impl MultiFunction {
    /// Bring the worker set in line with `keys`. Vanished keys release
    /// their slot warm, so a key that flickers gets its worker back.
    fn sync_keys(&mut self, ctx: &mut FuncContext<'_>, keys: Vec<String>) {
        let removed: Vec<(String, usize)> = self
            .active
            .iter()
            .filter(|(key, _)| !keys.contains(key))
            .map(|(key, slot)| (key.clone(), *slot))
            .collect();
        for (key, slot) in removed {
            self.active.shift_remove(&key);
            self.release_key(ctx, slot);
        }
        for key in keys {
            if !self.active.contains_key(&key) {
                self.add_key(ctx, key);
            }
        }
    }

    fn add_key(&mut self, ctx: &mut FuncContext<'_>, key: String) {
        let Some(slot) = self.pool.next(Some(&key)) else {
            return;
        };
        let owner = ctx.block_id();
        let engine = ctx.engine();
        let worker = match engine.child_block(owner, &worker_name(slot)) {
            Some(worker) => Some(worker),
            None => create_worker(engine, owner, slot, &self.template),
        };
        let Some(worker) = worker else {
            self.pool.done(slot, false);
            return;
        };
        // Templates read the key from the worker scope itself; in block
        // mode `#inputs` holds the observed source child, not a scope of
        // our own.
        if let Some(prop) = ctx.engine().ensure_prop(worker, "#key") {
            ctx.engine().write_runtime(prop, Value::string(&key));
        }
        if let Some(prop) = ctx.engine().ensure_prop(worker, "#inputs") {
            if self.watched_source.is_some() {
                ctx.engine()
                    .set_binding(prop, Some(&format!("##.input.{key}")));
            }
        }
        if !ctx.subscribe(&output_path(slot), slot as u64) {
            debug!(key, slot, "worker output path did not resolve");
        }
        self.active.insert(key, slot);
    }

    /// Detach a key's worker: subscription first, then the slot goes warm.
    fn release_key(&mut self, ctx: &mut FuncContext<'_>, slot: usize) {
        ctx.unsubscribe(&output_path(slot), slot as u64);
        let owner = ctx.block_id();
        if let Some(worker) = ctx.engine().child_block(owner, &worker_name(slot)) {
            if let Some(prop) = ctx.engine().find_prop(worker, "#inputs") {
                ctx.engine().set_binding(prop, None);
            }
        }
        if !self.pool.done(slot, true) {
            destroy_worker(ctx.engine(), owner, slot);
        }
    }

    /// Tear everything down: workers, watch, accounting.
    fn reset(&mut self, ctx: &mut FuncContext<'_>) -> bool {
        let had_any = !self.active.is_empty();
        let slots: Vec<usize> = self.active.drain(..).map(|(_, slot)| slot).collect();
        for slot in slots {
            ctx.unsubscribe(&output_path(slot), slot as u64);
        }
        let owner = ctx.block_id();
        for slot in self.pool.clear() {
            destroy_worker(ctx.engine(), owner, slot);
        }
        if let Some(source) = self.watched_source.take() {
            ctx.engine().unwatch_children(source, owner);
        }
        had_any
    }

    /// Child-block keys of a source block, in creation order.
    fn block_keys(engine: &crate::graph::engine::Engine, source: BlockId) -> Vec<String> {
        let Some(node) = engine.blocks.get(source) else {
            return Vec::new();
        };
        node.props
            .iter()
            .filter(|(name, prop)| {
                naming::category(name) == naming::FieldCategory::Ordinary
                    && engine
                        .props
                        .get(**prop)
                        .is_some_and(|p| p.value.is_block())
            })
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn sync_source(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        let input = ctx.input("input");
        match &input {
            Value::Block(source) => {
                let source = *source;
                // Workers made for a data source have no bindings to follow
                // a block source; start over. Block-to-block switches need
                // nothing: the `##.input.{key}` chains re-resolve on their
                // own.
                if self.watched_source.is_none() && !self.active.is_empty() {
                    self.reset(ctx);
                }
                if self.watched_source != Some(source) {
                    let owner = ctx.block_id();
                    if let Some(old) = self.watched_source.take() {
                        ctx.engine().unwatch_children(old, owner);
                    }
                    ctx.engine().watch_children(source, owner, TAG_SOURCE);
                    self.watched_source = Some(source);
                }
                let keys = Self::block_keys(ctx.engine(), source);
                self.sync_keys(ctx, keys);
            }
            _ if input.as_object().is_some() => {
                if self.watched_source.is_some() {
                    // Bound workers would write through to the old source.
                    self.reset(ctx);
                }
                let keys: Vec<String> = input
                    .as_object()
                    .map(|fields| fields.keys().cloned().collect())
                    .unwrap_or_default();
                self.sync_keys(ctx, keys);
                // Push the field values down; unchanged ones are dropped by
                // the value-equality gate.
                let owner = ctx.block_id();
                let assignments: Vec<(String, usize)> = self
                    .active
                    .iter()
                    .map(|(key, slot)| (key.clone(), *slot))
                    .collect();
                for (key, slot) in assignments {
                    let element = input.field(&key);
                    if let Some(worker) =
                        ctx.engine().child_block(owner, &worker_name(slot))
                    {
                        write_worker_inputs(ctx.engine(), worker, &key, &element);
                    }
                }
            }
            _ => {
                self.reset(ctx);
                return RunResult::Output(Value::Absent);
            }
        }
        ctx.defer_flush();
        RunResult::NoEmit
    }
}

impl Function for MultiFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        let template = ctx.input("template");
        if template != self.template {
            self.reset(ctx);
            self.template = template;
        }
        self.sync_source(ctx)
    }

    fn source_changed(&mut self, ctx: &mut FuncContext<'_>, tag: u64, _value: &Value) {
        if tag == TAG_SOURCE {
            // Child structure of the watched source moved.
            if let Some(source) = self.watched_source {
                if ctx.engine().blocks.contains(source) {
                    let keys = Self::block_keys(ctx.engine(), source);
                    self.sync_keys(ctx, keys);
                    ctx.defer_flush();
                } else {
                    // The source itself went away; the following input
                    // change clears the output.
                    self.reset(ctx);
                }
            }
            return;
        }
        if self.active.values().any(|slot| *slot == tag as usize) {
            ctx.defer_flush();
        }
    }

    fn flush_pending(&mut self, ctx: &mut FuncContext<'_>) {
        let owner = ctx.block_id();
        let mut aggregate = DataMap::new();
        for (key, slot) in &self.active {
            let engine = ctx.engine();
            let value = engine
                .child_block(owner, &worker_name(*slot))
                .and_then(|worker| engine.child_block(worker, "#outputs"))
                .map(|outputs| engine.block_prop_value(outputs, "value"))
                .unwrap_or(Value::Absent);
            aggregate.insert(key.clone(), output_json(&value));
        }
        ctx.emit(Value::data(JsonValue::Object(aggregate)));
    }

    fn cancel(&mut self, ctx: &mut FuncContext<'_>, _reason: &Value) -> bool {
        self.reset(ctx)
    }

    fn cleanup(&mut self, ctx: &mut FuncContext<'_>) {
        self.reset(ctx);
    }
}
