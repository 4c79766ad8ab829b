//! Properties: named, bindable fields of a block.
//!
//! A property carries three things: its current value, the explicitly-set
//! value that serialization persists (`saved`), and an optional binding. A
//! binding replaces explicit values with a live subscription; setting a
//! value explicitly severs the binding again. Runtime writes (function
//! outputs, wait indicators) move only the current value and leave `saved`
//! and the binding alone.

use std::sync::Arc;

use tracing::warn;

use crate::graph::dispatch::ListenerRef;
use crate::graph::engine::Engine;
use crate::graph::path::{parse_binding_path, PathAnchor};
use crate::types::{BlockId, ChainId, PropId};
use crate::value::Value;

pub(crate) struct PropNode {
    pub name: Arc<str>,
    pub owner: BlockId,
    pub value: Value,
    /// The last explicitly-set value; what serialization persists.
    pub saved: Value,
    pub binding: Option<Binding>,
    pub listeners: Vec<ListenerRef>,
    /// Set while this property's listeners are being notified.
    pub updating: bool,
}

impl PropNode {
    pub fn new(name: Arc<str>, owner: BlockId) -> Self {
        Self {
            name,
            owner,
            value: Value::Absent,
            saved: Value::Absent,
            binding: None,
            listeners: Vec::new(),
            updating: false,
        }
    }
}

pub(crate) struct Binding {
    /// The path as given, kept for serialization.
    pub path: Arc<str>,
    pub source: BindingSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingSource {
    /// Single-segment path: subscribed straight to a property.
    Prop(PropId),
    /// Multi-segment path: subscribed to the final chain node.
    Chain(ChainId),
    /// The anchor could not be resolved (for example `##` above the root).
    /// The binding stays inert but is still serialized.
    Unresolved,
}

impl Engine {
    /// The property named `name` on `block`, created on first touch.
    /// Returns `None` only if `block` is gone.
    pub(crate) fn ensure_prop(&mut self, block: BlockId, name: &str) -> Option<PropId> {
        if let Some(existing) = self
            .blocks
            .get(block)
            .and_then(|node| node.props.get(name).copied())
        {
            return Some(existing);
        }
        if !self.blocks.contains(block) {
            return None;
        }
        let name: Arc<str> = Arc::from(name);
        let prop = self.props.alloc(PropNode::new(name.clone(), block));
        if let Some(node) = self.blocks.get_mut(block) {
            node.props.insert(name, prop);
        }
        Some(prop)
    }

    pub(crate) fn find_prop(&self, block: BlockId, name: &str) -> Option<PropId> {
        self.blocks
            .get(block)
            .and_then(|node| node.props.get(name).copied())
    }

    pub(crate) fn prop_value(&self, prop: PropId) -> Value {
        self.props
            .get(prop)
            .map(|node| node.value.clone())
            .unwrap_or(Value::Absent)
    }

    pub(crate) fn block_prop_value(&self, block: BlockId, name: &str) -> Value {
        self.find_prop(block, name)
            .map(|prop| self.prop_value(prop))
            .unwrap_or(Value::Absent)
    }

    /// Explicitly set a value: severs any binding, records the value for
    /// serialization, and propagates.
    pub(crate) fn set_value(&mut self, prop: PropId, value: Value) -> bool {
        self.unbind(prop);
        if let Some(node) = self.props.get_mut(prop) {
            node.saved = value.clone();
        }
        self.update_value(prop, value, true)
    }

    /// Runtime write: function outputs and engine indicators. Leaves the
    /// saved value and any binding untouched, and never dispatches back to
    /// the owning function. Returns whether the value changed.
    pub(crate) fn write_runtime(&mut self, prop: PropId, value: Value) -> bool {
        self.update_value(prop, value, false)
    }

    /// Bind `prop` to `path`, resolved against its owning block. Returns
    /// whether the binding state changed.
    ///
    /// Re-binding the already-bound path is a no-op: the existing
    /// subscription is kept and nothing fires. Binding to a new path drops
    /// the saved value, since the serialized form of a bound property is
    /// the binding, not a value. Passing `None` severs the binding and
    /// clears the bound value, one change notification for the sever.
    pub(crate) fn set_binding(&mut self, prop: PropId, path: Option<&str>) -> bool {
        if let Some(path) = path {
            let already = self
                .props
                .get(prop)
                .and_then(|node| node.binding.as_ref())
                .is_some_and(|b| b.path.as_ref() == path);
            if already {
                return false;
            }
        }
        let had_binding = self.unbind(prop);
        let Some(path) = path else {
            if had_binding {
                self.update_value(prop, Value::Absent, true);
            }
            return had_binding;
        };

        let (owner, target_path) = match self.props.get(prop) {
            Some(node) => (node.owner, node.name.clone()),
            None => return had_binding,
        };
        if let Some(node) = self.props.get_mut(prop) {
            node.saved = Value::Absent;
        }

        let parsed = match parse_binding_path(path) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(prop = %target_path, path, %err, "rejecting malformed binding path");
                return had_binding;
            }
        };

        let anchor_block = match parsed.anchor {
            PathAnchor::Owner => Some(owner),
            PathAnchor::Up(n) => {
                let mut current = Some(owner);
                for _ in 0..n {
                    current = current
                        .and_then(|b| self.blocks.get(b))
                        .and_then(|node| node.owner_block);
                }
                // The hidden root container is not a bindable scope.
                current.filter(|b| *b != self.root_block)
            }
            PathAnchor::RootFlow => self.root_flow_of(owner),
        };
        let Some(anchor_block) = anchor_block else {
            warn!(path, "binding anchor out of range; leaving binding unresolved");
            if let Some(node) = self.props.get_mut(prop) {
                node.binding = Some(Binding {
                    path: Arc::from(path),
                    source: BindingSource::Unresolved,
                });
            }
            return true;
        };

        let Some(anchor_prop) = self.ensure_prop(anchor_block, &parsed.segments[0]) else {
            return had_binding;
        };

        let source = if parsed.segments.len() == 1 {
            if let Some(node) = self.props.get_mut(anchor_prop) {
                let entry = ListenerRef::Prop(prop);
                if !node.listeners.contains(&entry) {
                    node.listeners.push(entry);
                }
            }
            BindingSource::Prop(anchor_prop)
        } else {
            let chain = self.build_chain(owner, &parsed, anchor_prop);
            self.add_chain_dep(chain, ListenerRef::Prop(prop));
            BindingSource::Chain(chain)
        };

        if let Some(node) = self.props.get_mut(prop) {
            node.binding = Some(Binding {
                path: Arc::from(path),
                source,
            });
        }

        // Deliver the source's current value.
        let current = match source {
            BindingSource::Prop(p) => self.prop_value(p),
            BindingSource::Chain(c) => self
                .chains
                .get(c)
                .map(|n| n.value.clone())
                .unwrap_or(Value::Absent),
            BindingSource::Unresolved => Value::Absent,
        };
        self.update_value(prop, current, true);
        true
    }

    /// Drop the binding of `prop`, keeping its current value. Returns
    /// whether a binding was removed.
    pub(crate) fn unbind(&mut self, prop: PropId) -> bool {
        let binding = match self.props.get_mut(prop) {
            Some(node) => node.binding.take(),
            None => return false,
        };
        let Some(binding) = binding else {
            return false;
        };
        match binding.source {
            BindingSource::Prop(source) => {
                if let Some(node) = self.props.get_mut(source) {
                    node.listeners.retain(|l| *l != ListenerRef::Prop(prop));
                }
            }
            BindingSource::Chain(chain) => {
                self.remove_chain_dep(chain, ListenerRef::Prop(prop));
            }
            BindingSource::Unresolved => {}
        }
        true
    }

    /// The bound source of `prop` was destroyed: fall back to Absent with a
    /// single change notification. The binding stays, marked unresolved.
    pub(crate) fn source_lost(&mut self, prop: PropId) {
        if let Some(node) = self.props.get_mut(prop) {
            if let Some(binding) = node.binding.as_mut() {
                binding.source = BindingSource::Unresolved;
            }
        }
        self.update_value(prop, Value::Absent, true);
    }

    /// Destroy a property: release its binding, notify listeners, and tear
    /// down any child block it owns.
    pub(crate) fn destroy_prop(&mut self, prop: PropId) {
        let Some(node) = self.props.get(prop) else {
            return;
        };
        let owner = node.owner;
        let name = node.name.clone();
        let value = node.value.clone();

        self.unbind(prop);
        self.dispatch_destroyed(prop);
        if let Value::Block(child) = value {
            // A block value arriving through a binding is observed, not
            // owned; only the owning property tears the child down.
            let owned = self
                .blocks
                .get(child)
                .is_some_and(|b| b.owner_prop == Some(prop));
            if owned {
                self.destroy_block(child);
            }
        }
        if let Some(block) = self.blocks.get_mut(owner) {
            block.props.shift_remove(&name);
        }
        self.props.free(prop);
    }

    // =========================================================================
    // Block-level output helpers
    // =========================================================================

    /// Write `value` to the block's default emission field.
    pub(crate) fn emit_output(&mut self, block: BlockId, value: Value) {
        if let Some(prop) = self.ensure_prop(block, crate::graph::naming::OUTPUT) {
            self.write_runtime(prop, value);
        }
    }

    /// Raise the pending indicator.
    pub(crate) fn set_wait(&mut self, block: BlockId) {
        if let Some(prop) = self.ensure_prop(block, crate::graph::naming::WAIT) {
            self.write_runtime(prop, Value::Event(crate::event::Event::wait()));
        }
    }

    /// Clear the pending indicator, if raised.
    pub(crate) fn clear_wait(&mut self, block: BlockId) {
        if let Some(prop) = self.find_prop(block, crate::graph::naming::WAIT) {
            self.write_runtime(prop, Value::Absent);
        }
    }
}
