//! Central graph state.
//!
//! One [`Engine`] owns every block, property, and binding chain in arenas
//! plus the scheduler queues, the function registry, timers, and deferred
//! tasks. All mutation funnels through `&mut Engine`, which is what makes
//! the single-threaded cooperative model safe: a function can only touch the
//! graph through the context it is handed while it runs.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::clock::EngineClock;
use crate::config::RootConfig;
use crate::error::{EngineError, Result};
use crate::event::Event;
use crate::func::Registry;
use crate::graph::binding::ChainNode;
use crate::graph::block::BlockNode;
use crate::graph::dispatch::ListenerRef;
use crate::graph::property::PropNode;
use crate::scheduler::Resolver;
use crate::types::{Arena, BlockId, ChainId, PropId, TaskId, WatchId};
use crate::value::Value;

/// A buffered `source_changed` delivery.
///
/// Subscription notifications that arrive while the subscribing function is
/// itself running (or while another dispatch is in progress) are queued here
/// and delivered at the next flush point, so a function is never re-entered.
pub(crate) struct Poke {
    pub block: BlockId,
    pub tag: u64,
    pub value: Value,
}

pub(crate) struct TaskState {
    pub block: BlockId,
    pub live: bool,
}

pub(crate) struct WatchState {
    pub prop: PropId,
    pub callback: Box<dyn FnMut(&Value) + Send>,
}

pub(crate) struct Engine {
    pub blocks: Arena<BlockNode, BlockId>,
    pub props: Arena<PropNode, PropId>,
    pub chains: Arena<ChainNode, ChainId>,
    pub resolver: Resolver,
    pub registry: Registry,
    pub config: RootConfig,
    pub clock: Arc<dyn EngineClock>,
    /// Hidden container that owns the top-level flows.
    pub root_block: BlockId,
    /// `(deadline_millis, block)` wake-ups, earliest first.
    pub timers: BinaryHeap<Reverse<(u64, BlockId)>>,
    pub tasks: HashMap<u64, TaskState>,
    next_task_id: u64,
    pub watches: HashMap<u64, WatchState>,
    next_watch_id: u64,
    pub pending_pokes: VecDeque<Poke>,
    /// Blocks whose function asked to be flushed after the current pass.
    pub after_pass: Vec<BlockId>,
    pub schedule_hook: Option<Box<dyn FnMut() + Send>>,
    /// Guards against re-entrant poke flushing.
    flushing: bool,
}

impl Engine {
    pub fn new(config: RootConfig, clock: Arc<dyn EngineClock>, registry: Registry) -> Self {
        let mut blocks = Arena::new();
        let root_block = blocks.alloc(BlockNode::root());
        Self {
            blocks,
            props: Arena::new(),
            chains: Arena::new(),
            resolver: Resolver::new(),
            registry,
            config,
            clock,
            root_block,
            timers: BinaryHeap::new(),
            tasks: HashMap::new(),
            next_task_id: 1,
            watches: HashMap::new(),
            next_watch_id: 1,
            pending_pokes: VecDeque::new(),
            after_pass: Vec::new(),
            schedule_hook: None,
            flushing: false,
        }
    }

    // =========================================================================
    // Paths
    // =========================================================================

    /// Absolute dotted path of a block, for diagnostics and serialization.
    pub fn block_path(&self, id: BlockId) -> String {
        let mut segments: Vec<&str> = Vec::new();
        let mut current = Some(id);
        while let Some(block) = current {
            let Some(node) = self.blocks.get(block) else {
                break;
            };
            if !node.name.is_empty() {
                segments.push(&node.name);
            }
            current = node.owner_block;
        }
        segments.reverse();
        segments.join(".")
    }

    /// Resolve an absolute dotted path to an existing block.
    pub fn resolve_block(&self, path: &str) -> Result<BlockId> {
        if path.is_empty() {
            return Ok(self.root_block);
        }
        let mut current = self.root_block;
        for seg in path.split('.') {
            current = self
                .child_block(current, seg)
                .ok_or_else(|| EngineError::PathUnresolved {
                    path: path.to_string(),
                })?;
        }
        Ok(current)
    }

    /// Resolve an absolute dotted path to an existing property.
    pub fn resolve_prop(&self, path: &str) -> Result<PropId> {
        let (parent, name) = split_last(path)?;
        let block = self.resolve_block(parent)?;
        self.blocks
            .get(block)
            .and_then(|node| node.props.get(name).copied())
            .ok_or_else(|| EngineError::PathUnresolved {
                path: path.to_string(),
            })
    }

    /// Resolve an absolute dotted path to a property, creating the final
    /// property (but never intermediate blocks) if missing.
    pub fn ensure_prop_path(&mut self, path: &str) -> Result<PropId> {
        let (parent, name) = split_last(path)?;
        let block = self.resolve_block(parent)?;
        self.ensure_prop(block, name)
            .ok_or_else(|| EngineError::PathUnresolved {
                path: path.to_string(),
            })
    }

    /// The child block stored under `name`, if that property holds one.
    pub fn child_block(&self, block: BlockId, name: &str) -> Option<BlockId> {
        let node = self.blocks.get(block)?;
        let prop = *node.props.get(name)?;
        self.props.get(prop)?.value.as_block()
    }

    /// The root flow containing `block`: the ancestor directly under the
    /// hidden root container. A top-level flow is its own root flow.
    pub fn root_flow_of(&self, block: BlockId) -> Option<BlockId> {
        let mut current = block;
        loop {
            let node = self.blocks.get(current)?;
            match node.owner_block {
                None => return None, // the root container itself
                Some(owner) if owner == self.root_block => return Some(current),
                Some(owner) => current = owner,
            }
        }
    }

    // =========================================================================
    // Function subscriptions and external watches
    // =========================================================================

    /// Subscribe `block`'s function to changes of `prop`. Deliveries arrive
    /// through `Function::source_changed` with `tag`, starting with the
    /// property's current value at registration.
    pub fn subscribe_func(&mut self, prop: PropId, block: BlockId, tag: u64) {
        let entry = ListenerRef::Func { block, tag };
        let Some(prop_node) = self.props.get_mut(prop) else {
            return;
        };
        if prop_node.listeners.contains(&entry) {
            return;
        }
        prop_node.listeners.push(entry);
        if let Some(block_node) = self.blocks.get_mut(block) {
            if !block_node.subscriptions.contains(&(prop, tag)) {
                block_node.subscriptions.push((prop, tag));
            }
        }
        let current = self.prop_value(prop);
        self.queue_poke(block, tag, current);
        self.flush_pokes();
    }

    pub fn unsubscribe_func(&mut self, prop: PropId, block: BlockId, tag: u64) {
        if let Some(prop_node) = self.props.get_mut(prop) {
            prop_node
                .listeners
                .retain(|l| *l != ListenerRef::Func { block, tag });
        }
        if let Some(block_node) = self.blocks.get_mut(block) {
            block_node.subscriptions.retain(|s| *s != (prop, tag));
        }
    }

    /// Register a host callback on a property. The callback fires once with
    /// the current value, then on every accepted change until unwatched.
    pub fn watch_prop(
        &mut self,
        prop: PropId,
        mut callback: Box<dyn FnMut(&Value) + Send>,
    ) -> WatchId {
        let id = self.next_watch_id;
        self.next_watch_id += 1;
        callback(&self.prop_value(prop));
        self.watches.insert(id, WatchState { prop, callback });
        if let Some(node) = self.props.get_mut(prop) {
            node.listeners.push(ListenerRef::Watch(id));
        }
        WatchId(id)
    }

    pub fn unwatch(&mut self, id: WatchId) {
        if let Some(state) = self.watches.remove(&id.0) {
            if let Some(node) = self.props.get_mut(state.prop) {
                node.listeners.retain(|l| *l != ListenerRef::Watch(id.0));
            }
        }
    }

    // =========================================================================
    // Child-structure watchers
    // =========================================================================

    /// Watch `target` for child blocks appearing or disappearing. The
    /// watcher's function receives `source_changed` with `tag`.
    pub fn watch_children(&mut self, target: BlockId, watcher: BlockId, tag: u64) {
        if let Some(node) = self.blocks.get_mut(target) {
            if !node.child_watchers.contains(&(watcher, tag)) {
                node.child_watchers.push((watcher, tag));
            }
        }
        if let Some(node) = self.blocks.get_mut(watcher) {
            if !node.watching_children.contains(&target) {
                node.watching_children.push(target);
            }
        }
    }

    pub fn unwatch_children(&mut self, target: BlockId, watcher: BlockId) {
        if let Some(node) = self.blocks.get_mut(target) {
            node.child_watchers.retain(|(w, _)| *w != watcher);
        }
        if let Some(node) = self.blocks.get_mut(watcher) {
            node.watching_children.retain(|t| *t != target);
        }
    }

    pub fn notify_child_watchers(&mut self, block: BlockId) {
        let watchers = match self.blocks.get(block) {
            Some(node) if !node.child_watchers.is_empty() => node.child_watchers.clone(),
            _ => return,
        };
        for (watcher, tag) in watchers {
            self.queue_poke(watcher, tag, Value::Absent);
        }
        self.flush_pokes();
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Re-queue `block` once the clock reaches `at_millis`.
    pub fn schedule_wake(&mut self, at_millis: u64, block: BlockId) {
        self.timers.push(Reverse((at_millis, block)));
    }

    /// Queue every block whose wake time has arrived.
    pub fn fire_due_timers(&mut self) -> usize {
        let now = self.clock.now_millis();
        let mut fired = 0;
        while let Some(Reverse((at, block))) = self.timers.peek().copied() {
            if at > now {
                break;
            }
            self.timers.pop();
            if self.blocks.contains(block) {
                self.queue_block(block);
                fired += 1;
            }
        }
        fired
    }

    // =========================================================================
    // Deferred tasks
    // =========================================================================

    /// Create a deferred-result ticket for `block`.
    pub fn create_task(&mut self, block: BlockId) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.tasks.insert(id, TaskState { block, live: true });
        if let Some(node) = self.blocks.get_mut(block) {
            node.pending_task = Some(TaskId(id));
        }
        TaskId(id)
    }

    /// Resolve a deferred ticket. The value (or an error event) lands in the
    /// block's output field and propagates through the ordinary dispatch
    /// path; the pending indicator clears. Returns `false` for stale or
    /// invalidated tickets.
    pub fn complete_task(
        &mut self,
        task: TaskId,
        outcome: std::result::Result<Value, String>,
    ) -> bool {
        let Some(state) = self.tasks.remove(&task.0) else {
            return false;
        };
        if !state.live || !self.blocks.contains(state.block) {
            return false;
        }
        if let Some(node) = self.blocks.get_mut(state.block) {
            if node.pending_task == Some(task) {
                node.pending_task = None;
            }
        }
        let value = match outcome {
            Ok(v) => v,
            Err(msg) => {
                debug!(block = %self.block_path(state.block), error = %msg, "deferred task failed");
                Value::Event(Event::error(msg))
            }
        };
        self.clear_wait(state.block);
        self.emit_output(state.block, value);
        self.flush_pokes();
        true
    }

    /// Invalidate the block's outstanding ticket, if any. A later
    /// `complete_task` for it becomes a no-op.
    pub fn invalidate_task(&mut self, block: BlockId) {
        let pending = self
            .blocks
            .get_mut(block)
            .and_then(|node| node.pending_task.take());
        if let Some(task) = pending {
            if let Some(state) = self.tasks.get_mut(&task.0) {
                state.live = false;
            }
        }
    }

    // =========================================================================
    // Buffered function notifications
    // =========================================================================

    pub fn queue_poke(&mut self, block: BlockId, tag: u64, value: Value) {
        self.pending_pokes.push_back(Poke { block, tag, value });
    }

    /// Deliver buffered `source_changed` notifications. Skips (and retains)
    /// deliveries whose target is currently running; those drain on the next
    /// flush after the run completes.
    pub fn flush_pokes(&mut self) {
        if self.flushing {
            return;
        }
        self.flushing = true;
        let mut retry = VecDeque::new();
        while let Some(poke) = self.pending_pokes.pop_front() {
            let Some(node) = self.blocks.get_mut(poke.block) else {
                continue;
            };
            if node.running {
                retry.push_back(poke);
                continue;
            }
            let Some(mut func) = node.func.take() else {
                continue;
            };
            node.running = true;
            let mut ctx = crate::func::FuncContext::new(self, poke.block);
            func.source_changed(&mut ctx, poke.tag, &poke.value);
            if let Some(node) = self.blocks.get_mut(poke.block) {
                if node.running {
                    node.running = false;
                    node.func = Some(func);
                }
            }
        }
        self.pending_pokes = retry;
        self.flushing = false;
    }

    /// Ask for `block`'s function to be flushed once the current scheduler
    /// pass settles. Used by fan-out functions to coalesce emissions.
    pub fn defer_flush(&mut self, block: BlockId) {
        if !self.after_pass.contains(&block) {
            self.after_pass.push(block);
        }
    }

    /// Run the after-pass flush hooks registered during the last pass.
    pub fn drain_after_pass(&mut self) {
        let pending = std::mem::take(&mut self.after_pass);
        for block in pending {
            let Some(node) = self.blocks.get_mut(block) else {
                continue;
            };
            if node.running {
                // Cannot happen between passes; drop rather than re-enter.
                continue;
            }
            let Some(mut func) = node.func.take() else {
                continue;
            };
            node.running = true;
            let mut ctx = crate::func::FuncContext::new(self, block);
            func.flush_pending(&mut ctx);
            if let Some(node) = self.blocks.get_mut(block) {
                if node.running {
                    node.running = false;
                    node.func = Some(func);
                }
            }
        }
        self.flush_pokes();
    }
}

/// Split `path` into `(parent, last_segment)`.
fn split_last(path: &str) -> Result<(&str, &str)> {
    if path.is_empty() {
        return Err(EngineError::PathSyntax {
            path: String::new(),
            cause: "empty path".to_string(),
        });
    }
    Ok(match path.rsplit_once('.') {
        Some((parent, name)) if !name.is_empty() => (parent, name),
        Some(_) => {
            return Err(EngineError::PathSyntax {
                path: path.to_string(),
                cause: "empty segment".to_string(),
            })
        }
        None => ("", path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_last_forms() {
        assert_eq!(split_last("a").unwrap(), ("", "a"));
        assert_eq!(split_last("a.b.c").unwrap(), ("a.b", "c"));
        assert!(split_last("").is_err());
        assert!(split_last("a.").is_err());
    }
}
