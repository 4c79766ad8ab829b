//! Logic functions.
//!
//! `logic:not` inverts the loose truthiness of its input. Truthiness is the
//! engine-wide rule from [`Value::truthy`]: absent, events, null, `false`,
//! `0`, and `""` count as false.

use trellis_core::func::{PropDesc, PropType};
use trellis_core::naming;
use trellis_core::{FuncContext, FuncDesc, Function, Registry, Result, RunResult, Value};

/// `logic:not`. Outputs the negated truthiness of `input`.
#[derive(Debug, Default)]
pub struct NotFunction;

impl Function for NotFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        RunResult::Output(Value::bool(!ctx.input("input").truthy()))
    }
}

/// Register the logic functions.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        FuncDesc::new("logic:not")
            .category("logic")
            .prop(PropDesc::new("input", PropType::Any).pinned())
            .prop(PropDesc::new(naming::OUTPUT, PropType::Bool).readonly()),
        || Box::new(NotFunction),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trellis_core::Root;

    use super::*;

    fn output_of(data: serde_json::Value) -> Value {
        let mut root = Root::new();
        crate::register_builtins(root.registry_mut()).unwrap();
        root.add_flow("f", Some(&json!({ "b": data }))).unwrap();
        root.run_all(8);
        root.value_at("f.b.#output").unwrap_or_default()
    }

    #[test]
    fn inverts_truthiness() {
        assert_eq!(
            output_of(json!({"#is": "logic:not", "input": 0})).as_bool(),
            Some(true)
        );
        assert_eq!(
            output_of(json!({"#is": "logic:not", "input": "text"})).as_bool(),
            Some(false)
        );
        assert_eq!(
            output_of(json!({"#is": "logic:not", "input": null})).as_bool(),
            Some(true)
        );
    }

    #[test]
    fn unwired_input_counts_as_false() {
        assert_eq!(
            output_of(json!({"#is": "logic:not"})).as_bool(),
            Some(true)
        );
    }

    #[test]
    fn chains_through_a_binding() {
        let mut root = Root::new();
        crate::register_builtins(root.registry_mut()).unwrap();
        root.add_flow(
            "f",
            Some(&json!({
                "a": {"#is": "logic:not", "input": false},
                "b": {"#is": "logic:not", "~input": "##.a.#output"},
            })),
        )
        .unwrap();
        root.run_all(8);
        // a outputs true, b negates it back.
        assert_eq!(root.value_at("f.a.#output").unwrap().as_bool(), Some(true));
        assert_eq!(root.value_at("f.b.#output").unwrap().as_bool(), Some(false));
    }
}
