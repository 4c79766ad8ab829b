//! Function instances and their registry.
//!
//! A function is the behavior attached to a block through its `#is` field.
//! Instances are created from the [`Registry`] and owned by the block; the
//! engine checks an instance out while calling into it, so a function never
//! sees the graph except through the [`FuncContext`] it is handed.

mod context;
mod descriptor;
mod registry;

pub use context::FuncContext;
pub use descriptor::{FuncDesc, PropDesc, PropEntry, PropGroupDesc, PropType};
pub use registry::Registry;

use serde::{Deserialize, Serialize};

use crate::types::TaskId;
use crate::value::Value;

/// When a block's function runs in response to changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FuncMode {
    /// Run once after load, then on every accepted input change.
    #[default]
    OnLoad,
    /// Run on accepted input changes only; nothing happens at load.
    OnChange,
    /// Run only when `#call` is triggered.
    OnCall,
}

impl FuncMode {
    /// Parse the serialized form used by the `#mode` field.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "onLoad" => Some(Self::OnLoad),
            "onChange" => Some(Self::OnChange),
            "onCall" => Some(Self::OnCall),
            _ => None,
        }
    }

    /// The serialized form used by the `#mode` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnLoad => "onLoad",
            Self::OnChange => "onChange",
            Self::OnCall => "onCall",
        }
    }
}

/// Outcome of one [`Function::run`] call.
#[derive(Debug)]
pub enum RunResult {
    /// Write this value to `#output`.
    Output(Value),
    /// Completed, leave `#output` alone.
    Done,
    /// Completed and deliberately produced nothing.
    NoEmit,
    /// Still working; `#wait` stays up until a later run settles it.
    Wait,
    /// Failed; `#output` becomes an error event.
    Error(String),
    /// Result arrives through [`crate::Root::complete_task`] under this
    /// ticket.
    Deferred(TaskId),
}

/// Behavior attached to a block.
///
/// Only [`Function::run`] is required; the lifecycle hooks default to
/// no-ops so simple functions stay one method long.
pub trait Function: Send {
    /// Filter for ordinary input changes. Returning `false` consumes the
    /// change without scheduling a run.
    fn input_changed(&mut self, _name: &str, _value: &Value) -> bool {
        true
    }

    /// Filter for reserved `#` config changes. Returning `true` requests a
    /// run.
    fn config_changed(&mut self, _name: &str, _value: &Value) -> bool {
        false
    }

    /// Execute once. The scheduler calls this when the block is queued and
    /// its turn comes up.
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult;

    /// A property subscribed through [`FuncContext::subscribe`] changed.
    /// Never re-entered: deliveries are buffered while this function is on
    /// the call stack.
    fn source_changed(&mut self, _ctx: &mut FuncContext<'_>, _tag: u64, _value: &Value) {}

    /// Called between scheduler passes after [`FuncContext::defer_flush`].
    fn flush_pending(&mut self, _ctx: &mut FuncContext<'_>) {}

    /// `#cancel` was triggered with `reason`. Return `true` if work was
    /// actually abandoned.
    fn cancel(&mut self, _ctx: &mut FuncContext<'_>, _reason: &Value) -> bool {
        false
    }

    /// Graph-visible teardown; runs before the instance is dropped while
    /// the block (possibly) still exists.
    fn cleanup(&mut self, _ctx: &mut FuncContext<'_>) {}

    /// Last call before drop. No graph access.
    fn destroy(&mut self) {}
}

impl std::fmt::Debug for dyn Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Function")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings_round_trip() {
        for mode in [FuncMode::OnLoad, FuncMode::OnChange, FuncMode::OnCall] {
            assert_eq!(FuncMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(FuncMode::parse("always"), None);
    }

    #[test]
    fn mode_serde_uses_camel_case() {
        let json = serde_json::to_string(&FuncMode::OnChange).unwrap();
        assert_eq!(json, "\"onChange\"");
        let back: FuncMode = serde_json::from_str("\"onCall\"").unwrap();
        assert_eq!(back, FuncMode::OnCall);
    }
}
