//! Change dispatch.
//!
//! A property is an observable value holder: it keeps a listener set and
//! notifies it synchronously when the value actually changes. Listeners are
//! ids, not callbacks: the dispatch loop looks each one up when it fires,
//! so a listener destroyed mid-dispatch is simply skipped and the set can be
//! mutated freely while a notification is in flight.

use tracing::trace;

use crate::graph::engine::Engine;
use crate::graph::naming;
use crate::types::{BlockId, ChainId, PropId};
use crate::value::Value;

/// One entry in a property's listener set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerRef {
    /// A property bound to this source: deliveries overwrite its value.
    Prop(PropId),
    /// A binding-chain node watching this property.
    Chain(ChainId),
    /// A function subscription; delivered through `Function::source_changed`
    /// with `tag`.
    Func { block: BlockId, tag: u64 },
    /// An external watch callback registered through the root.
    Watch(u64),
}

impl Engine {
    /// Overwrite the value of `prop` and notify on change.
    ///
    /// `notify_owner` selects whether the owning block's function hears
    /// about the change: true for host writes and binding deliveries, false
    /// for runtime writes (function outputs, wait indicators). That is
    /// what keeps a function's own emissions from re-triggering it.
    ///
    /// Returns true if the value changed. Writing an equal value is a no-op
    /// and fires nothing.
    pub(crate) fn update_value(&mut self, prop: PropId, value: Value, notify_owner: bool) -> bool {
        let Some(node) = self.props.get_mut(prop) else {
            return false;
        };
        if node.value == value {
            return false;
        }
        let old = std::mem::replace(&mut node.value, value.clone());
        self.dispatch_listeners(prop);
        if notify_owner {
            // Re-read: a re-entrant write during dispatch may have moved the
            // value again, and the function should hear the newest one.
            if let Some(current) = self.props.get(prop).map(|n| n.value.clone()) {
                self.notify_owner(prop, &current);
            }
        }
        // A replaced child block dies with its subtree, after listeners saw
        // the new value. Only the owning property may do this: a binding
        // delivering a block value merely observes it.
        if let Value::Block(old_block) = old {
            if value.as_block() != Some(old_block) {
                let owned = self
                    .blocks
                    .get(old_block)
                    .is_some_and(|b| b.owner_prop == Some(prop));
                if owned {
                    self.destroy_block(old_block);
                }
            }
        }
        true
    }

    /// Notify every listener of `prop` with its current value.
    ///
    /// Re-entrant value updates during the loop are allowed: the value is
    /// re-read before each delivery, so later listeners in the same pass see
    /// the newest value, and the `updating` flag keeps the nested update
    /// from starting a second full pass over the same set.
    pub(crate) fn dispatch_listeners(&mut self, prop: PropId) {
        let snapshot = {
            let Some(node) = self.props.get_mut(prop) else {
                return;
            };
            if node.updating || node.listeners.is_empty() {
                return;
            }
            node.updating = true;
            node.listeners.clone()
        };

        for listener in snapshot {
            // The set may have shrunk while we were dispatching.
            let Some(node) = self.props.get(prop) else {
                break;
            };
            if !node.listeners.contains(&listener) {
                continue;
            }
            let current = node.value.clone();
            self.notify_listener(listener, prop, current);
        }

        if let Some(node) = self.props.get_mut(prop) {
            node.updating = false;
        }
    }

    fn notify_listener(&mut self, listener: ListenerRef, from: PropId, value: Value) {
        match listener {
            ListenerRef::Prop(target) => {
                trace!(prop = %target, "binding delivery");
                self.update_value(target, value, true);
            }
            ListenerRef::Chain(chain) => {
                self.chain_notified(chain, from, value);
            }
            ListenerRef::Func { block, tag } => {
                self.queue_poke(block, tag, value);
            }
            ListenerRef::Watch(id) => {
                // The callback has no engine access; calling it inline is
                // safe even mid-dispatch.
                let mut state = match self.watches.remove(&id) {
                    Some(state) => state,
                    None => return,
                };
                (state.callback)(&value);
                self.watches.insert(id, state);
            }
        }
    }

    /// Tell each listener that `prop` is going away. Bound properties fall
    /// back to Absent (one change notification), chains drop their source,
    /// watches see Absent.
    pub(crate) fn dispatch_destroyed(&mut self, prop: PropId) {
        let listeners = match self.props.get_mut(prop) {
            Some(node) => std::mem::take(&mut node.listeners),
            None => return,
        };
        for listener in listeners {
            match listener {
                ListenerRef::Prop(target) => {
                    self.source_lost(target);
                }
                ListenerRef::Chain(chain) => {
                    self.chain_source_destroyed(chain, prop);
                }
                ListenerRef::Func { block, tag } => {
                    self.queue_poke(block, tag, Value::Absent);
                }
                ListenerRef::Watch(id) => {
                    if let Some(mut state) = self.watches.remove(&id) {
                        (state.callback)(&Value::Absent);
                        self.watches.insert(id, state);
                    }
                }
            }
        }
    }

    /// The owning block's function hears about the change according to the
    /// field-name category.
    fn notify_owner(&mut self, prop: PropId, value: &Value) {
        let (owner, name) = {
            let Some(node) = self.props.get(prop) else {
                return;
            };
            (node.owner, node.name.clone())
        };
        match naming::category(&name) {
            naming::FieldCategory::Ordinary => self.ordinary_changed(owner, &name, value),
            naming::FieldCategory::Config => {
                if naming::is_meta(&name) {
                    self.meta_changed(owner, &name, value);
                }
            }
            naming::FieldCategory::Attribute => {}
        }
    }
}
