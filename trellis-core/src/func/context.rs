//! The window a running function gets onto its block and the engine.

use crate::graph::engine::Engine;
use crate::graph::naming;
use crate::types::{BlockId, TaskId};
use crate::value::Value;

/// Handle passed to every [`crate::Function`] call.
///
/// Scopes engine access to the owning block: inputs, outputs, deferral
/// tickets, wake timers, and subscriptions all go through here.
pub struct FuncContext<'a> {
    engine: &'a mut Engine,
    block: BlockId,
}

impl<'a> FuncContext<'a> {
    pub(crate) fn new(engine: &'a mut Engine, block: BlockId) -> Self {
        Self { engine, block }
    }

    /// The block this function instance is attached to.
    pub fn block_id(&self) -> BlockId {
        self.block
    }

    /// Absolute dotted path of the block, for diagnostics.
    pub fn path(&self) -> String {
        self.engine.block_path(self.block)
    }

    /// Current value of one of the block's properties. Absent when the
    /// property does not exist.
    pub fn input(&self, name: &str) -> Value {
        self.engine.block_prop_value(self.block, name)
    }

    /// Names of the block's ordinary properties, in creation order.
    pub fn input_names(&self) -> Vec<String> {
        self.engine
            .blocks
            .get(self.block)
            .map(|node| {
                node.props
                    .keys()
                    .filter(|name| {
                        naming::category(name) == naming::FieldCategory::Ordinary
                    })
                    .map(|name| name.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write a runtime value to a named field of the block. Does not mark
    /// it saved and does not feed back into the block's own scheduling.
    pub fn output(&mut self, name: &str, value: Value) {
        if let Some(prop) = self.engine.ensure_prop(self.block, name) {
            self.engine.write_runtime(prop, value);
        }
    }

    /// Write `#output` immediately, mid-run. Fan-out functions use this to
    /// emit several results from a single run.
    pub fn emit(&mut self, value: Value) {
        self.engine.emit_output(self.block, value);
    }

    /// Open a deferred-result ticket; the run should then return
    /// [`crate::RunResult::Deferred`] with it.
    pub fn defer(&mut self) -> TaskId {
        self.engine.create_task(self.block)
    }

    /// Re-queue this block once the clock reaches `at_millis`.
    pub fn schedule_wake(&mut self, at_millis: u64) {
        self.engine.schedule_wake(at_millis, self.block);
    }

    /// Ask for [`crate::Function::flush_pending`] once the current
    /// scheduler pass settles.
    pub fn defer_flush(&mut self) {
        self.engine.defer_flush(self.block);
    }

    /// Current engine time in milliseconds.
    pub fn now(&self) -> u64 {
        self.engine.clock.now_millis()
    }

    /// The root configuration.
    pub fn config(&self) -> &crate::config::RootConfig {
        &self.engine.config
    }

    /// Subscribe to a property at `rel_path` below this block. Changes
    /// arrive through [`crate::Function::source_changed`] with `tag`.
    /// Returns `false` when the path cannot be resolved.
    pub fn subscribe(&mut self, rel_path: &str, tag: u64) -> bool {
        let Ok(prop) = self.engine.ensure_prop_path(&self.absolute(rel_path)) else {
            return false;
        };
        self.engine.subscribe_func(prop, self.block, tag);
        true
    }

    /// Drop a subscription made through [`FuncContext::subscribe`].
    pub fn unsubscribe(&mut self, rel_path: &str, tag: u64) {
        if let Ok(prop) = self.engine.resolve_prop(&self.absolute(rel_path)) {
            self.engine.unsubscribe_func(prop, self.block, tag);
        }
    }

    fn absolute(&self, rel_path: &str) -> String {
        let base = self.engine.block_path(self.block);
        if base.is_empty() {
            rel_path.to_string()
        } else {
            format!("{base}.{rel_path}")
        }
    }

    /// Full engine access for built-in machinery that manages child blocks.
    pub(crate) fn engine(&mut self) -> &mut Engine {
        self.engine
    }
}
