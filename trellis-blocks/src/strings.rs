//! String functions.
//!
//! `str:join` renders a numbered part group into one string, with an
//! optional separator between parts.

use trellis_core::func::{PropDesc, PropGroupDesc, PropType};
use trellis_core::naming;
use trellis_core::{FuncContext, FuncDesc, Function, Registry, Result, RunResult, Value};

/// Part count used until a block sets `#len`.
const PARTS_DEFAULT: usize = 2;
/// Hard cap on the part count.
const PARTS_MAX: usize = 16;

/// `str:join`. Concatenates the part group.
///
/// Strings pass through untouched; numbers, booleans, arrays, and objects
/// render as their JSON form. Absent and null parts are skipped, so unwired
/// slots contribute nothing instead of literal `null` text.
#[derive(Debug, Default)]
pub struct JoinFunction;

impl JoinFunction {
    fn part(index: usize, value: &Value) -> std::result::Result<Option<String>, String> {
        if value.is_absent() {
            return Ok(None);
        }
        let Some(json) = value.as_json() else {
            return Err(format!("part {index} is not renderable"));
        };
        if json.is_null() {
            return Ok(None);
        }
        Ok(Some(match json.as_str() {
            Some(s) => s.to_string(),
            None => json.to_string(),
        }))
    }
}

impl Function for JoinFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        let len = ctx
            .input(naming::LEN)
            .as_i64()
            .map(|len| len.clamp(0, PARTS_MAX as i64) as usize)
            .unwrap_or(PARTS_DEFAULT);
        let mut parts = Vec::new();
        for index in 0..len {
            match Self::part(index, &ctx.input(&index.to_string())) {
                Ok(Some(part)) => parts.push(part),
                Ok(None) => {}
                Err(msg) => return RunResult::Error(msg),
            }
        }
        if parts.is_empty() {
            return RunResult::NoEmit;
        }
        let separator = ctx.input("separator");
        let separator = separator.as_str().unwrap_or("");
        RunResult::Output(Value::string(parts.join(separator)))
    }
}

/// Register the string functions.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        FuncDesc::new("str:join")
            .category("str")
            .prop(PropDesc::new("separator", PropType::String))
            .group(
                PropGroupDesc::new("", PARTS_DEFAULT)
                    .max(PARTS_MAX)
                    .prop(PropDesc::new("", PropType::Any).pinned()),
            )
            .prop(PropDesc::new(naming::OUTPUT, PropType::String).readonly()),
        || Box::new(JoinFunction),
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
    fn joins_with_separator() {
        let out = output_of(json!({
            "#is": "str:join", "separator": ", ", "0": "a", "1": "b"
        }));
        assert_eq!(out.as_str(), Some("a, b"));
    }

    #[test]
    fn default_separator_is_empty() {
        let out = output_of(json!({"#is": "str:join", "0": "ab", "1": "cd"}));
        assert_eq!(out.as_str(), Some("abcd"));
    }

    #[test]
    fn non_strings_render_as_json() {
        let out = output_of(json!({
            "#is": "str:join", "separator": "-", "#len": 3,
            "0": 1, "1": true, "2": [2, 3]
        }));
        assert_eq!(out.as_str(), Some("1-true-[2,3]"));
    }

    #[test]
    fn null_and_absent_parts_are_skipped() {
        let out = output_of(json!({
            "#is": "str:join", "separator": "/", "#len": 4,
            "0": "x", "2": null, "3": "y"
        }));
        assert_eq!(out.as_str(), Some("x/y"));
    }

    #[test]
    fn nothing_to_join_emits_nothing() {
        let out = output_of(json!({"#is": "str:join"}));
        assert!(out.is_absent());
    }
}
