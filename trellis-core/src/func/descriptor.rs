//! Function descriptors.
//!
//! A descriptor is the schema half of a registration: the property layout,
//! default mode and priority of a function id. Descriptors can extend a
//! `base` descriptor; the effective property list is the base chain walked
//! root first. Editors read these, the engine itself only uses the mode and
//! priority defaults.

use serde::{Deserialize, Serialize};

use crate::func::FuncMode;
use crate::graph::DEFAULT_PRIORITY;

/// Schema and defaults for one registered function id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncDesc {
    /// Registry key, conventionally `category:name`.
    pub id: String,
    /// Id of the descriptor this one extends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Mode a block gets unless it sets `#mode` itself.
    #[serde(default)]
    pub mode: FuncMode,
    /// Priority a block gets unless it sets `#priority` itself.
    #[serde(default = "default_priority")]
    pub priority: usize,
    /// Declared properties, in display order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropEntry>,
    /// Editor grouping label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl FuncDesc {
    /// Start a descriptor for `id` with default mode and priority.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base: None,
            mode: FuncMode::default(),
            priority: DEFAULT_PRIORITY,
            properties: Vec::new(),
            category: None,
        }
    }

    /// Extend the descriptor registered under `base`.
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Set the default mode.
    pub fn mode(mut self, mode: FuncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the default priority.
    pub fn priority(mut self, priority: usize) -> Self {
        self.priority = priority;
        self
    }

    /// Set the editor category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Append a single property.
    pub fn prop(mut self, prop: PropDesc) -> Self {
        self.properties.push(PropEntry::Prop(prop));
        self
    }

    /// Append a repeatable property group.
    pub fn group(mut self, group: PropGroupDesc) -> Self {
        self.properties.push(PropEntry::Group(group));
        self
    }
}

fn default_priority() -> usize {
    DEFAULT_PRIORITY
}

/// One entry in a descriptor's property list: either a single property or a
/// repeatable group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropEntry {
    /// A repeatable group.
    Group(PropGroupDesc),
    /// A single property.
    Prop(PropDesc),
}

impl PropEntry {
    /// Name of the property or group.
    pub fn name(&self) -> &str {
        match self {
            Self::Group(g) => &g.name,
            Self::Prop(p) => &p.name,
        }
    }
}

/// Declaration of one property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropDesc {
    /// Field name on the block.
    pub name: String,
    /// Expected value type.
    #[serde(rename = "type")]
    pub prop_type: PropType,
    /// Whether hosts should treat the field as output-only.
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
    /// Whether editors show the field by default.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,
}

impl PropDesc {
    /// Declare a writable, unpinned property.
    pub fn new(name: impl Into<String>, prop_type: PropType) -> Self {
        Self {
            name: name.into(),
            prop_type,
            readonly: false,
            pinned: false,
        }
    }

    /// Mark the property output-only.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Mark the property shown by default.
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

/// Numbered input group, like the operand list of an arithmetic function.
/// Members are named by index, `0` through `#len - 1`, with `default_len`
/// used until the block sets `#len`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropGroupDesc {
    /// Group name, prefixed to each member's index.
    pub name: String,
    /// Member count before the block sets `#len`.
    #[serde(default = "default_group_len")]
    pub default_len: usize,
    /// Upper bound honored when a block raises `#len`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
    /// Template repeated per member.
    pub properties: Vec<PropDesc>,
}

impl PropGroupDesc {
    /// Declare an empty group.
    pub fn new(name: impl Into<String>, default_len: usize) -> Self {
        Self {
            name: name.into(),
            default_len,
            max_len: None,
            properties: Vec::new(),
        }
    }

    /// Cap the member count.
    pub fn max(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Append a member template property.
    pub fn prop(mut self, prop: PropDesc) -> Self {
        self.properties.push(prop);
        self
    }
}

fn default_group_len() -> usize {
    2
}

/// Declared value type of a property, for editors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropType {
    /// A numeric value.
    Number,
    /// A string value.
    String,
    /// A boolean value.
    Bool,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// A child block.
    Block,
    /// Any value.
    Any,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_serde_shape() {
        let desc = FuncDesc::new("join")
            .category("string")
            .prop(PropDesc::new("separator", PropType::String))
            .group(
                PropGroupDesc::new("", 2).prop(PropDesc::new("", PropType::Any)),
            );
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["id"], "join");
        assert_eq!(json["mode"], "onLoad");
        assert_eq!(json["properties"][0]["type"], "string");
        assert_eq!(json["properties"][1]["default_len"], 2);

        let back: FuncDesc = serde_json::from_value(json).unwrap();
        assert!(matches!(back.properties[0], PropEntry::Prop(_)));
        assert!(matches!(back.properties[1], PropEntry::Group(_)));
    }
}
