//! Binding chains.
//!
//! A multi-segment binding path resolves through one chain node per path
//! prefix. Each node watches its upstream (the anchor property for the
//! first extra segment, the previous node after that) and resolves one
//! segment: when the upstream value is a block, the node subscribes to that
//! block's property of the same name; when it is plain data, the node drills
//! into the data field; anything else resolves Absent until the graph
//! changes shape.
//!
//! Nodes are cached per owning block and keyed by the textual prefix, so two
//! bindings into the same remote object share every intermediate
//! subscription. A node is released when its last dependent detaches.

use std::sync::Arc;

use crate::graph::dispatch::ListenerRef;
use crate::graph::engine::Engine;
use crate::graph::naming::{SEG_ROOT_FLOW, SEG_UP};
use crate::graph::path::{BindingPath, PathAnchor};
use crate::types::{BlockId, ChainId, PropId};
use crate::value::Value;

pub(crate) struct ChainNode {
    pub owner: BlockId,
    /// Cache key in the owner block: the textual path prefix.
    pub key: Arc<str>,
    /// The segment this node resolves.
    pub field: Arc<str>,
    pub upstream: ChainUpstream,
    /// Subscribed property when the upstream value is a block.
    pub source: Option<PropId>,
    pub value: Value,
    /// Dependents: bound properties and longer chain nodes.
    pub deps: Vec<ListenerRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChainUpstream {
    Prop(PropId),
    Chain(ChainId),
}

impl Engine {
    /// Build (or reuse) the chain for `parsed`, returning the final node.
    /// Only called for paths with at least two field segments.
    pub(crate) fn build_chain(
        &mut self,
        owner: BlockId,
        parsed: &BindingPath,
        anchor_prop: PropId,
    ) -> ChainId {
        let mut prefix = anchor_prefix(&parsed.anchor);
        prefix.push_str(&parsed.segments[0]);

        let mut id = self.chain_node_for(
            owner,
            &mut prefix,
            &parsed.segments[1],
            ChainUpstream::Prop(anchor_prop),
        );
        for seg in &parsed.segments[2..] {
            id = self.chain_node_for(owner, &mut prefix, seg, ChainUpstream::Chain(id));
        }
        id
    }

    fn chain_node_for(
        &mut self,
        owner: BlockId,
        prefix: &mut String,
        field: &Arc<str>,
        upstream: ChainUpstream,
    ) -> ChainId {
        prefix.push('.');
        prefix.push_str(field);
        let key: Arc<str> = Arc::from(prefix.as_str());

        if let Some(existing) = self
            .blocks
            .get(owner)
            .and_then(|node| node.chains.get(&key).copied())
        {
            return existing;
        }

        let id = self.chains.alloc(ChainNode {
            owner,
            key: key.clone(),
            field: field.clone(),
            upstream,
            source: None,
            value: Value::Absent,
            deps: Vec::new(),
        });
        if let Some(node) = self.blocks.get_mut(owner) {
            node.chains.insert(key, id);
        }
        let initial = match upstream {
            ChainUpstream::Prop(p) => {
                if let Some(node) = self.props.get_mut(p) {
                    let entry = ListenerRef::Chain(id);
                    if !node.listeners.contains(&entry) {
                        node.listeners.push(entry);
                    }
                }
                self.prop_value(p)
            }
            ChainUpstream::Chain(u) => {
                self.add_chain_dep(u, ListenerRef::Chain(id));
                self.chains
                    .get(u)
                    .map(|n| n.value.clone())
                    .unwrap_or(Value::Absent)
            }
        };
        self.chain_resolve(id, initial);
        id
    }

    pub(crate) fn add_chain_dep(&mut self, chain: ChainId, dep: ListenerRef) {
        if let Some(node) = self.chains.get_mut(chain) {
            if !node.deps.contains(&dep) {
                node.deps.push(dep);
            }
        }
    }

    pub(crate) fn remove_chain_dep(&mut self, chain: ChainId, dep: ListenerRef) {
        if let Some(node) = self.chains.get_mut(chain) {
            node.deps.retain(|d| *d != dep);
        }
        self.release_chain_if_unused(chain);
    }

    /// A property this chain listens to changed. The same chain may listen
    /// to its upstream anchor and to its resolved source; `from` tells the
    /// two apart.
    pub(crate) fn chain_notified(&mut self, chain: ChainId, from: PropId, value: Value) {
        let Some(node) = self.chains.get(chain) else {
            return;
        };
        if node.source == Some(from) {
            self.set_chain_value(chain, value);
        } else if node.upstream == ChainUpstream::Prop(from) {
            self.chain_resolve(chain, value);
        }
    }

    /// A property this chain listens to is being destroyed.
    pub(crate) fn chain_source_destroyed(&mut self, chain: ChainId, prop: PropId) {
        let Some(node) = self.chains.get_mut(chain) else {
            return;
        };
        if node.source == Some(prop) {
            node.source = None;
            self.set_chain_value(chain, Value::Absent);
        } else if node.upstream == ChainUpstream::Prop(prop) {
            node.source = None;
            self.set_chain_value(chain, Value::Absent);
        }
    }

    /// Re-resolve this node's segment against a new upstream value.
    pub(crate) fn chain_resolve(&mut self, chain: ChainId, upstream_value: Value) {
        let (field, old_source) = match self.chains.get(chain) {
            Some(node) => (node.field.clone(), node.source),
            None => return,
        };

        let (new_source, new_value) = match upstream_value.as_block() {
            Some(block) => {
                // Creating the property means a later write to it reaches us.
                match self.ensure_prop(block, &field) {
                    Some(p) => (Some(p), self.prop_value(p)),
                    None => (None, Value::Absent),
                }
            }
            None => (None, upstream_value.field(&field)),
        };

        if old_source != new_source {
            if let Some(old) = old_source {
                if let Some(node) = self.props.get_mut(old) {
                    node.listeners.retain(|l| *l != ListenerRef::Chain(chain));
                }
            }
            if let Some(new) = new_source {
                if let Some(node) = self.props.get_mut(new) {
                    let entry = ListenerRef::Chain(chain);
                    if !node.listeners.contains(&entry) {
                        node.listeners.push(entry);
                    }
                }
            }
            if let Some(node) = self.chains.get_mut(chain) {
                node.source = new_source;
            }
        }
        self.set_chain_value(chain, new_value);
    }

    /// Update the node's resolved value and notify dependents on change.
    fn set_chain_value(&mut self, chain: ChainId, value: Value) {
        let deps = {
            let Some(node) = self.chains.get_mut(chain) else {
                return;
            };
            if node.value == value {
                return;
            }
            node.value = value.clone();
            node.deps.clone()
        };
        for dep in deps {
            let still_there = self
                .chains
                .get(chain)
                .is_some_and(|node| node.deps.contains(&dep));
            if !still_there {
                continue;
            }
            let current = self
                .chains
                .get(chain)
                .map(|n| n.value.clone())
                .unwrap_or(Value::Absent);
            match dep {
                ListenerRef::Prop(target) => {
                    self.update_value(target, current, true);
                }
                ListenerRef::Chain(next) => {
                    self.chain_resolve(next, current);
                }
                _ => {}
            }
        }
    }

    /// Release a node once nothing depends on it, unwinding its upstream
    /// subscription (which may release the previous node in turn).
    pub(crate) fn release_chain_if_unused(&mut self, chain: ChainId) {
        let Some(node) = self.chains.get(chain) else {
            return;
        };
        if !node.deps.is_empty() {
            return;
        }
        let owner = node.owner;
        let key = node.key.clone();
        let upstream = node.upstream;
        let source = node.source;

        if let Some(block) = self.blocks.get_mut(owner) {
            block.chains.remove(&key);
        }
        if let Some(source) = source {
            if let Some(prop) = self.props.get_mut(source) {
                prop.listeners.retain(|l| *l != ListenerRef::Chain(chain));
            }
        }
        match upstream {
            ChainUpstream::Prop(p) => {
                if let Some(prop) = self.props.get_mut(p) {
                    prop.listeners.retain(|l| *l != ListenerRef::Chain(chain));
                }
            }
            ChainUpstream::Chain(u) => {
                self.remove_chain_dep(u, ListenerRef::Chain(chain));
            }
        }
        self.chains.free(chain);
    }

    /// Tear down every chain owned by `block`. Used during block destroy;
    /// upstream properties may already be gone, which the arena lookups
    /// tolerate.
    pub(crate) fn destroy_chains_of(&mut self, block: BlockId) {
        let ids: Vec<ChainId> = match self.blocks.get_mut(block) {
            Some(node) => node.chains.drain().map(|(_, id)| id).collect(),
            None => return,
        };
        for chain in ids {
            let Some(node) = self.chains.get(chain) else {
                continue;
            };
            let upstream = node.upstream;
            let source = node.source;
            if let Some(source) = source {
                if let Some(prop) = self.props.get_mut(source) {
                    prop.listeners.retain(|l| *l != ListenerRef::Chain(chain));
                }
            }
            if let ChainUpstream::Prop(p) = upstream {
                if let Some(prop) = self.props.get_mut(p) {
                    prop.listeners.retain(|l| *l != ListenerRef::Chain(chain));
                }
            }
            self.chains.free(chain);
        }
    }
}

fn anchor_prefix(anchor: &PathAnchor) -> String {
    match anchor {
        PathAnchor::Owner => String::new(),
        PathAnchor::Up(n) => {
            let mut out = String::new();
            for _ in 0..*n {
                out.push_str(SEG_UP);
                out.push('.');
            }
            out
        }
        PathAnchor::RootFlow => format!("{SEG_ROOT_FLOW}."),
    }
}
