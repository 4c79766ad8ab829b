//! Block serialization.
//!
//! A block serializes to a JSON object: `#is` first, then saved properties
//! in creation order. Bindings serialize as `"~name": "path"`, child blocks
//! as nested objects. An object is recognized as a child block on load by
//! the presence of an `#is` key. Runtime fields are never saved, so worker
//! scopes and output indicators disappear from persisted flows.

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::graph::engine::Engine;
use crate::graph::naming;
use crate::types::BlockId;
use crate::value::{DataMap, Value};

impl Engine {
    // =========================================================================
    // Save
    // =========================================================================

    pub fn save_block(&self, block: BlockId) -> JsonValue {
        let mut map = DataMap::new();
        let Some(node) = self.blocks.get(block) else {
            return JsonValue::Object(map);
        };

        if let Some(prop) = node.props.get(naming::IS).copied() {
            if let Some(prop_node) = self.props.get(prop) {
                if let Some(json) = prop_node.saved.as_json() {
                    map.insert(naming::IS.to_string(), json.clone());
                }
            }
        }

        for (name, prop) in &node.props {
            if name.as_ref() == naming::IS {
                continue;
            }
            let Some(prop_node) = self.props.get(*prop) else {
                continue;
            };
            if let Some(binding) = &prop_node.binding {
                map.insert(
                    naming::binding_key(name),
                    JsonValue::String(binding.path.to_string()),
                );
                continue;
            }
            match &prop_node.saved {
                Value::Block(child) => {
                    map.insert(name.to_string(), self.save_block(*child));
                }
                Value::Data(json) => {
                    map.insert(name.to_string(), (**json).clone());
                }
                Value::Absent | Value::Event(_) => {}
            }
        }
        JsonValue::Object(map)
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Populate an empty block from serialized data. Queues nothing until
    /// the whole subtree is in place, then queues blocks whose function
    /// runs on load.
    pub fn load_block(&mut self, block: BlockId, data: &DataMap) {
        if let Some(node) = self.blocks.get_mut(block) {
            node.loading = true;
        } else {
            return;
        }

        if let Some(is) = data.get(naming::IS) {
            self.load_entry(block, naming::IS, is);
        }
        for (key, entry) in data {
            if key == naming::IS {
                continue;
            }
            self.load_entry(block, key, entry);
        }

        self.finish_loading(block);
    }

    fn load_entry(&mut self, block: BlockId, key: &str, entry: &JsonValue) -> bool {
        if let Some(name) = naming::as_binding_key(key) {
            let JsonValue::String(path) = entry else {
                warn!(block = %self.block_path(block), key, "binding entry is not a string, skipped");
                return false;
            };
            let Some(prop) = self.ensure_prop(block, name) else {
                return false;
            };
            return self.set_binding(prop, Some(path));
        }

        if let JsonValue::Object(obj) = entry {
            if obj.contains_key(naming::IS) {
                return self.load_child(block, key, obj);
            }
        }

        let Some(prop) = self.ensure_prop(block, key) else {
            return false;
        };
        self.set_value(prop, Value::data(entry.clone()))
    }

    fn load_child(&mut self, block: BlockId, name: &str, data: &DataMap) -> bool {
        match self.child_block(block, name) {
            Some(child) => self.live_update_block(child, data),
            None => match self.create_block(block, name, false) {
                Ok(child) => {
                    self.load_block(child, data);
                    true
                }
                Err(err) => {
                    warn!(block = %self.block_path(block), name, %err, "child block creation failed");
                    false
                }
            },
        }
    }

    /// Clear the loading flag and queue the on-load run.
    fn finish_loading(&mut self, block: BlockId) {
        let queue = {
            let Some(node) = self.blocks.get_mut(block) else {
                return;
            };
            node.loading = false;
            node.func.is_some()
                && !node.disabled
                && node.effective_mode() == crate::func::FuncMode::OnLoad
        };
        if queue {
            self.queue_block(block);
        }
    }

    // =========================================================================
    // Live update
    // =========================================================================

    /// Reconcile an existing block against new serialized data without
    /// tearing it down. Saved state absent from `data` is removed, changed
    /// entries are applied, untouched properties keep their runtime values.
    /// Returns whether anything changed.
    pub fn live_update_block(&mut self, block: BlockId, data: &DataMap) -> bool {
        let Some(node) = self.blocks.get_mut(block) else {
            return false;
        };
        node.loading = true;
        let mut changed = false;

        // Saved properties that disappeared from the data.
        let stale: Vec<crate::types::PropId> = self
            .blocks
            .get(block)
            .map(|node| {
                node.props
                    .iter()
                    .filter(|(name, prop)| {
                        if name.as_ref() == naming::IS {
                            return !data.contains_key(naming::IS);
                        }
                        if data.contains_key(name.as_ref())
                            || data.contains_key(&naming::binding_key(name))
                        {
                            return false;
                        }
                        self.props
                            .get(**prop)
                            .is_some_and(|p| !p.saved.is_absent() || p.binding.is_some())
                    })
                    .map(|(_, prop)| *prop)
                    .collect()
            })
            .unwrap_or_default();
        if !stale.is_empty() {
            changed = true;
        }
        for prop in stale {
            self.set_value(prop, Value::Absent);
        }

        if let Some(is) = data.get(naming::IS) {
            changed |= self.load_entry(block, naming::IS, is);
        }
        for (key, entry) in data {
            if key == naming::IS {
                continue;
            }
            changed |= self.load_entry(block, key, entry);
        }

        let queue = {
            let Some(node) = self.blocks.get_mut(block) else {
                return changed;
            };
            node.loading = false;
            changed
                && node.func.is_some()
                && !node.disabled
                && node.effective_mode() == crate::func::FuncMode::OnLoad
        };
        if queue {
            self.queue_block(block);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::clock::MockClock;
    use crate::config::RootConfig;
    use crate::func::Registry;

    fn engine() -> Engine {
        Engine::new(
            RootConfig::default(),
            Arc::new(MockClock::new()),
            Registry::new(),
        )
    }

    fn as_map(json: JsonValue) -> DataMap {
        match json {
            JsonValue::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn save_orders_is_first_and_keeps_bindings() {
        let mut engine = engine();
        let root = engine.root_block;
        let flow = engine.create_block(root, "f", true).unwrap();
        let b1 = engine.create_block(flow, "b1", false).unwrap();

        let val = engine.ensure_prop(b1, "value").unwrap();
        engine.set_value(val, Value::int(5));
        let is = engine.ensure_prop(b1, naming::IS).unwrap();
        engine.set_value(is, Value::string("add"));
        let other = engine.ensure_prop(b1, "other").unwrap();
        engine.set_binding(other, Some("value"));

        let saved = engine.save_block(b1);
        let map = as_map(saved);
        let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys[0], "#is");
        assert!(keys.contains(&"value"));
        assert!(keys.contains(&"~other"));
        assert_eq!(map["~other"], json!("value"));
        assert_eq!(map["value"], json!(5));
    }

    #[test]
    fn runtime_fields_are_not_saved() {
        let mut engine = engine();
        let root = engine.root_block;
        let b = engine.create_block(root, "b", false).unwrap();
        engine.emit_output(b, Value::int(9));
        engine.set_wait(b);
        let val = engine.ensure_prop(b, "x").unwrap();
        engine.set_value(val, Value::int(1));

        let map = as_map(engine.save_block(b));
        assert!(!map.contains_key("#output"));
        assert!(!map.contains_key("#wait"));
        assert_eq!(map["x"], json!(1));
    }

    #[test]
    fn load_builds_children_and_bindings() {
        let mut engine = engine();
        let root = engine.root_block;
        let flow = engine.create_block(root, "f", true).unwrap();
        let data = as_map(json!({
            "a": {"#is": "", "value": 3},
            "b": {"#is": "", "~input": "##.a.value"},
            "plain": {"no_is": true},
        }));
        engine.load_block(flow, &data);

        let a = engine.child_block(flow, "a").expect("child a");
        assert_eq!(engine.block_prop_value(a, "value").as_i64(), Some(3));

        let b = engine.child_block(flow, "b").expect("child b");
        assert_eq!(engine.block_prop_value(b, "input").as_i64(), Some(3));

        // No #is key means plain data, not a block.
        let plain = engine.block_prop_value(flow, "plain");
        assert!(plain.as_object().is_some());
        assert!(engine.child_block(flow, "plain").is_none());
    }

    #[test]
    fn load_then_save_round_trips() {
        let mut engine = engine();
        let root = engine.root_block;
        let flow = engine.create_block(root, "f", true).unwrap();
        let data = as_map(json!({
            "a": {"#is": "", "value": 3},
            "b": {"#is": "", "~input": "##.a.value", "offset": null},
        }));
        engine.load_block(flow, &data);
        let saved = as_map(engine.save_block(flow));
        assert_eq!(JsonValue::Object(saved), JsonValue::Object(data));
    }

    #[test]
    fn live_update_removes_stale_and_applies_new() {
        let mut engine = engine();
        let root = engine.root_block;
        let flow = engine.create_block(root, "f", true).unwrap();
        engine.load_block(
            flow,
            &as_map(json!({
                "a": {"#is": "", "value": 3},
                "gone": {"#is": "", "value": 1},
            })),
        );
        let a = engine.child_block(flow, "a").unwrap();

        let changed = engine.live_update_block(
            flow,
            &as_map(json!({
                "a": {"#is": "", "value": 7},
            })),
        );
        assert!(changed);
        // Same child block instance, updated in place.
        assert_eq!(engine.child_block(flow, "a"), Some(a));
        assert_eq!(engine.block_prop_value(a, "value").as_i64(), Some(7));
        assert!(engine.child_block(flow, "gone").is_none());
    }

    #[test]
    fn live_update_with_same_data_changes_nothing() {
        let mut engine = engine();
        let root = engine.root_block;
        let flow = engine.create_block(root, "f", true).unwrap();
        let data = as_map(json!({"a": {"#is": "", "value": 3}}));
        engine.load_block(flow, &data);
        assert!(!engine.live_update_block(flow, &data));
    }
}
