//! Test instrumentation function.
//!
//! `test:probe` makes scheduling visible from the outside: every run bumps a
//! counter and re-emits the current `input`, so a test can count runs and
//! check what the block saw by reading `#output`. Handy together with
//! `#mode`, `#sync`, and `#priority` overrides.

use serde_json::{json, Value as JsonValue};
use tracing::trace;

use trellis_core::func::{PropDesc, PropType};
use trellis_core::naming;
use trellis_core::{FuncContext, FuncDesc, Function, Registry, Result, RunResult, Value};

/// `test:probe`. Outputs `{"count": n, "input": <current input>}`.
///
/// The count lives in the instance, so replacing the block's `#is` or
/// destroying the block resets it.
#[derive(Debug, Default)]
pub struct ProbeFunction {
    runs: u64,
}

impl Function for ProbeFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        self.runs += 1;
        let input = ctx.input("input");
        let echoed = input.as_json().cloned().unwrap_or(JsonValue::Null);
        trace!(path = %ctx.path(), runs = self.runs, "probe ran");
        RunResult::Output(Value::data(json!({
            "count": self.runs,
            "input": echoed,
        })))
    }

    fn cancel(&mut self, _ctx: &mut FuncContext<'_>, _reason: &Value) -> bool {
        // Nothing is ever in flight; report that there was nothing to stop.
        false
    }
}

/// Register the test instrumentation functions.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        FuncDesc::new("test:probe")
            .category("test")
            .prop(PropDesc::new("input", PropType::Any).pinned())
            .prop(PropDesc::new(naming::OUTPUT, PropType::Object).readonly()),
        || Box::new(ProbeFunction::default()),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trellis_core::Root;

    use super::*;

    fn root_with(data: serde_json::Value) -> Root {
        let mut root = Root::new();
        crate::register_builtins(root.registry_mut()).unwrap();
        root.add_flow("f", Some(&json!({ "b": data }))).unwrap();
        root
    }

    fn count(root: &Root) -> Option<i64> {
        root.value_at("f.b.#output")
            .unwrap_or_default()
            .field("count")
            .as_i64()
    }

    #[test]
    fn counts_runs_and_echoes_input() {
        let mut root = root_with(json!({"#is": "test:probe", "input": "x"}));
        root.run_all(8);
        let out = root.value_at("f.b.#output").unwrap();
        assert_eq!(out.field("count").as_i64(), Some(1));
        assert_eq!(out.field("input").as_str(), Some("x"));

        root.set_value_at("f.b.input", Value::int(4)).unwrap();
        root.run_all(8);
        let out = root.value_at("f.b.#output").unwrap();
        assert_eq!(out.field("count").as_i64(), Some(2));
        assert_eq!(out.field("input").as_i64(), Some(4));
    }

    #[test]
    fn on_change_mode_skips_the_initial_run() {
        let mut root = root_with(json!({"#is": "test:probe", "#mode": "onChange"}));
        root.run_all(8);
        assert_eq!(count(&root), None);

        root.set_value_at("f.b.input", Value::int(1)).unwrap();
        root.run_all(8);
        assert_eq!(count(&root), Some(1));
    }

    #[test]
    fn on_call_mode_runs_only_when_called() {
        let mut root = root_with(json!({"#is": "test:probe", "#mode": "onCall"}));
        root.run_all(8);
        root.set_value_at("f.b.input", Value::int(1)).unwrap();
        root.run_all(8);
        assert_eq!(count(&root), None);

        root.set_value_at("f.b.#call", Value::bool(true)).unwrap();
        root.run_all(8);
        assert_eq!(count(&root), Some(1));
    }

    #[test]
    fn disabled_blocks_do_not_run() {
        let mut root = root_with(json!({"#is": "test:probe", "#disabled": true}));
        root.run_all(8);
        assert_eq!(count(&root), None);

        root.set_value_at("f.b.#disabled", Value::bool(false)).unwrap();
        root.run_all(8);
        assert_eq!(count(&root), Some(1));
    }
}
