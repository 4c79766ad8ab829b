//! Block nodes and their reactions to property changes.
//!
//! A block is one node of the graph: a named property table, an optional
//! function instance, and the scheduling state that drives it. Flows and
//! worker scopes are blocks with extra flags; the hidden root container is a
//! block with no owner.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::func::{FuncContext, FuncMode, Function};
use crate::graph::dispatch::ListenerRef;
use crate::graph::engine::Engine;
use crate::graph::naming;
use crate::types::{BlockId, ChainId, PropId, TaskId};
use crate::value::Value;

/// Scheduler priority used when neither the block nor its function
/// descriptor picks one.
pub const DEFAULT_PRIORITY: usize = 1;

pub(crate) struct BlockNode {
    pub name: Arc<str>,
    pub owner_block: Option<BlockId>,
    pub owner_prop: Option<PropId>,
    /// Flows are save/load roots and binding scope boundaries.
    pub is_flow: bool,
    /// Properties in creation order. Order is observable through save.
    pub props: IndexMap<Arc<str>, PropId>,
    /// Binding chain nodes owned by this block, keyed by path prefix.
    pub chains: HashMap<Arc<str>, ChainId>,
    pub func: Option<Box<dyn Function>>,
    pub func_id: Option<Arc<str>>,
    pub mode_override: Option<FuncMode>,
    pub desc_mode: FuncMode,
    pub priority_override: Option<usize>,
    pub desc_priority: usize,
    pub sync: bool,
    pub disabled: bool,
    /// In the scheduler (wait buffer or a level queue).
    pub queued: bool,
    /// Still due to run; cleared the moment the scheduler picks it up.
    pub queue_to_run: bool,
    /// The function is currently on the call stack.
    pub running: bool,
    /// Deserialization in progress; changes do not queue until it ends.
    pub loading: bool,
    pub pending_task: Option<TaskId>,
    /// `(prop, tag)` subscriptions made through the function context.
    pub subscriptions: Vec<(PropId, u64)>,
    /// `(watcher, tag)` pairs watching this block's child structure.
    pub child_watchers: Vec<(BlockId, u64)>,
    /// Blocks whose child structure this block's function watches.
    pub watching_children: Vec<BlockId>,
}

impl BlockNode {
    pub fn new(name: Arc<str>, owner_block: BlockId, owner_prop: PropId) -> Self {
        Self {
            name,
            owner_block: Some(owner_block),
            owner_prop: Some(owner_prop),
            is_flow: false,
            props: IndexMap::new(),
            chains: HashMap::new(),
            func: None,
            func_id: None,
            mode_override: None,
            desc_mode: FuncMode::default(),
            priority_override: None,
            desc_priority: DEFAULT_PRIORITY,
            sync: false,
            disabled: false,
            queued: false,
            queue_to_run: false,
            running: false,
            loading: false,
            pending_task: None,
            subscriptions: Vec::new(),
            child_watchers: Vec::new(),
            watching_children: Vec::new(),
        }
    }

    /// The hidden container above all top-level flows.
    pub fn root() -> Self {
        Self {
            name: Arc::from(""),
            owner_block: None,
            owner_prop: None,
            is_flow: false,
            props: IndexMap::new(),
            chains: HashMap::new(),
            func: None,
            func_id: None,
            mode_override: None,
            desc_mode: FuncMode::default(),
            priority_override: None,
            desc_priority: DEFAULT_PRIORITY,
            sync: false,
            disabled: false,
            queued: false,
            queue_to_run: false,
            running: false,
            loading: false,
            pending_task: None,
            subscriptions: Vec::new(),
            child_watchers: Vec::new(),
            watching_children: Vec::new(),
        }
    }

    pub fn effective_mode(&self) -> FuncMode {
        self.mode_override.unwrap_or(self.desc_mode)
    }

    pub fn effective_priority(&self) -> usize {
        self.priority_override.unwrap_or(self.desc_priority)
    }
}

impl Engine {
    // =========================================================================
    // Creation and destruction
    // =========================================================================

    /// Create a child block under `owner.name`. Whatever the property held
    /// before is replaced; a previous child block is destroyed after its
    /// listeners have seen the new value.
    pub fn create_block(&mut self, owner: BlockId, name: &str, is_flow: bool) -> Result<BlockId> {
        let prop = self
            .ensure_prop(owner, name)
            .ok_or_else(|| EngineError::BlockGone {
                block: owner.to_string(),
            })?;
        let id = self
            .blocks
            .alloc(BlockNode::new(Arc::from(name), owner, prop));
        if let Some(node) = self.blocks.get_mut(id) {
            node.is_flow = is_flow;
        }
        self.set_value(prop, Value::Block(id));
        self.notify_child_watchers(owner);
        Ok(id)
    }

    /// Create a child block that exists only at runtime: the owning
    /// property's saved value stays Absent, so serialization never sees it.
    /// Worker scopes are made this way.
    pub fn create_block_runtime(&mut self, owner: BlockId, name: &str) -> Result<BlockId> {
        let prop = self
            .ensure_prop(owner, name)
            .ok_or_else(|| EngineError::BlockGone {
                block: owner.to_string(),
            })?;
        let id = self
            .blocks
            .alloc(BlockNode::new(Arc::from(name), owner, prop));
        self.write_runtime(prop, Value::Block(id));
        self.notify_child_watchers(owner);
        Ok(id)
    }

    /// Tear down a block and everything under it. The owning property is
    /// left to the caller; replacement and property destruction both handle
    /// it on their side.
    pub fn destroy_block(&mut self, block: BlockId) {
        if block == self.root_block {
            return;
        }
        let Some(node) = self.blocks.get_mut(block) else {
            return;
        };
        node.queued = false;
        node.queue_to_run = false;
        let owner = node.owner_block;
        let func = node.func.take();
        let subscriptions = std::mem::take(&mut node.subscriptions);
        let watching = std::mem::take(&mut node.watching_children);
        let watchers = std::mem::take(&mut node.child_watchers);

        if let Some(mut func) = func {
            let mut ctx = FuncContext::new(self, block);
            func.cleanup(&mut ctx);
            func.destroy();
        }
        self.invalidate_task(block);

        for (prop, tag) in subscriptions {
            if let Some(prop_node) = self.props.get_mut(prop) {
                prop_node
                    .listeners
                    .retain(|l| *l != ListenerRef::Func { block, tag });
            }
        }
        for target in watching {
            if let Some(target_node) = self.blocks.get_mut(target) {
                target_node.child_watchers.retain(|(w, _)| *w != block);
            }
        }
        for (watcher, tag) in watchers {
            if let Some(watcher_node) = self.blocks.get_mut(watcher) {
                watcher_node.watching_children.retain(|t| *t != block);
            }
            self.queue_poke(watcher, tag, Value::Absent);
        }

        let props: Vec<PropId> = self
            .blocks
            .get(block)
            .map(|node| node.props.values().copied().collect())
            .unwrap_or_default();
        for prop in props {
            self.destroy_prop(prop);
        }
        self.destroy_chains_of(block);
        self.blocks.free(block);
        if let Some(owner) = owner {
            self.notify_child_watchers(owner);
        }
    }

    // =========================================================================
    // Change reactions
    // =========================================================================

    /// An ordinary (input) property of `owner` changed.
    pub(crate) fn ordinary_changed(&mut self, owner: BlockId, name: &str, value: &Value) {
        let Some(node) = self.blocks.get_mut(owner) else {
            return;
        };
        if node.disabled || node.loading {
            return;
        }
        if !matches!(node.effective_mode(), FuncMode::OnLoad | FuncMode::OnChange) {
            return;
        }
        let wants_run = match node.func.as_mut() {
            Some(func) => func.input_changed(name, value),
            // Mid-run self writes still re-trigger; otherwise there is
            // nothing to run.
            None => node.running,
        };
        if !wants_run {
            return;
        }
        if node.sync && !node.running {
            self.run_block(owner);
        } else {
            self.queue_block(owner);
        }
    }

    /// A reserved `#` property of `owner` changed.
    pub(crate) fn meta_changed(&mut self, owner: BlockId, name: &str, value: &Value) {
        match name {
            naming::IS => {
                self.replace_function(owner, value);
                return;
            }
            naming::MODE => {
                if let Some(node) = self.blocks.get_mut(owner) {
                    node.mode_override = value.as_str().and_then(FuncMode::parse);
                }
            }
            naming::PRIORITY => {
                if let Some(node) = self.blocks.get_mut(owner) {
                    node.priority_override = value
                        .as_i64()
                        .filter(|p| (0..4).contains(p))
                        .map(|p| p as usize);
                }
            }
            naming::SYNC => {
                if let Some(node) = self.blocks.get_mut(owner) {
                    node.sync = value.truthy();
                }
            }
            naming::DISABLED => {
                let enabled_now = {
                    let Some(node) = self.blocks.get_mut(owner) else {
                        return;
                    };
                    let was = node.disabled;
                    node.disabled = value.truthy();
                    was && !node.disabled
                };
                // Coming back from disabled behaves like a fresh load.
                if enabled_now {
                    let queue = self.blocks.get(owner).is_some_and(|node| {
                        node.func.is_some()
                            && !node.loading
                            && node.effective_mode() == FuncMode::OnLoad
                    });
                    if queue {
                        self.queue_block(owner);
                    }
                }
                return;
            }
            naming::CALL => {
                self.called(owner, value);
                return;
            }
            naming::CANCEL => {
                if !value.is_absent() {
                    self.cancel_block(owner, value);
                }
                return;
            }
            _ => return,
        }
        // #mode, #priority and #sync also reach the function as config.
        self.config_changed(owner, name, value);
    }

    fn config_changed(&mut self, owner: BlockId, name: &str, value: &Value) {
        let wants_run = {
            let Some(node) = self.blocks.get_mut(owner) else {
                return;
            };
            if node.disabled || node.loading {
                return;
            }
            match node.func.as_mut() {
                Some(func) => func.config_changed(name, value),
                None => false,
            }
        };
        if wants_run {
            self.queue_block(owner);
        }
    }

    /// `#call` was written. Any concrete value triggers a run regardless of
    /// mode; events pass through without triggering.
    fn called(&mut self, owner: BlockId, value: &Value) {
        if value.is_absent() || value.is_event() {
            return;
        }
        let Some(node) = self.blocks.get_mut(owner) else {
            return;
        };
        if node.disabled || node.loading || node.func.is_none() {
            return;
        }
        if node.sync && !node.running {
            self.run_block(owner);
        } else {
            self.queue_block(owner);
        }
    }

    /// `#cancel` was written. Offers the reason to the function, then drops
    /// any outstanding deferred ticket and clears the wait indicator.
    pub(crate) fn cancel_block(&mut self, block: BlockId, reason: &Value) {
        // Checked out like a run: cancellation may tear down worker scopes
        // and subscriptions, which needs the graph.
        let func = self.blocks.get_mut(block).and_then(|node| {
            if node.running {
                return None;
            }
            node.running = true;
            node.func.take()
        });
        if let Some(mut func) = func {
            let mut ctx = FuncContext::new(self, block);
            let accepted = func.cancel(&mut ctx, reason);
            if let Some(node) = self.blocks.get_mut(block) {
                if node.running {
                    node.running = false;
                    node.func = Some(func);
                }
            }
            if accepted {
                debug!(block = %self.block_path(block), "cancelled");
            }
        }
        self.invalidate_task(block);
        self.clear_wait(block);
    }

    // =========================================================================
    // Function lifecycle
    // =========================================================================

    /// Apply a new `#is` value: tear down the old function instance and
    /// build the new one from the registry. A failed lookup leaves the block
    /// functionless but keeps the id, so a later save round-trips it.
    pub(crate) fn replace_function(&mut self, block: BlockId, value: &Value) {
        let new_id: Option<Arc<str>> = value
            .as_str()
            .filter(|s| !s.is_empty())
            .map(Arc::from);
        let old = {
            let Some(node) = self.blocks.get_mut(block) else {
                return;
            };
            if node.func_id == new_id {
                return;
            }
            node.func_id = new_id.clone();
            // If the replacement happens inside the block's own run, the
            // cleared flag tells the runner not to restore the old instance.
            node.running = false;
            node.desc_mode = FuncMode::default();
            node.desc_priority = DEFAULT_PRIORITY;
            node.func.take()
        };
        if let Some(mut func) = old {
            let mut ctx = FuncContext::new(self, block);
            func.cleanup(&mut ctx);
            func.destroy();
        }
        // Subscriptions and child watches belonged to the old instance.
        let (subscriptions, watching) = match self.blocks.get_mut(block) {
            Some(node) => (
                std::mem::take(&mut node.subscriptions),
                std::mem::take(&mut node.watching_children),
            ),
            None => return,
        };
        for (prop, tag) in subscriptions {
            if let Some(prop_node) = self.props.get_mut(prop) {
                prop_node
                    .listeners
                    .retain(|l| *l != ListenerRef::Func { block, tag });
            }
        }
        for target in watching {
            if let Some(target_node) = self.blocks.get_mut(target) {
                target_node.child_watchers.retain(|(w, _)| *w != block);
            }
        }
        self.invalidate_task(block);
        self.clear_wait(block);
        if let Some(prop) = self.find_prop(block, naming::OUTPUT) {
            self.write_runtime(prop, Value::Absent);
        }

        let Some(id) = new_id else {
            return;
        };
        match self.registry.create(&id) {
            Ok(func) => {
                let (mode, priority) = self.registry.defaults(&id);
                let queue = {
                    let Some(node) = self.blocks.get_mut(block) else {
                        return;
                    };
                    node.func = Some(func);
                    node.desc_mode = mode;
                    node.desc_priority = priority;
                    !node.loading
                        && !node.disabled
                        && node.effective_mode() == FuncMode::OnLoad
                };
                if queue {
                    self.queue_block(block);
                }
            }
            Err(err) => {
                warn!(block = %self.block_path(block), %id, %err, "function unavailable");
            }
        }
    }
}
