//! Arithmetic functions (variadic operand groups).
//!
//! `math:add`, `math:subtract`, and `math:multiply` fold a numbered operand
//! group into a single number. All three extend the abstract `math` base
//! descriptor, which declares the group; the block raises or lowers the
//! operand count through `#len`.

use trellis_core::func::{PropDesc, PropGroupDesc, PropType};
use trellis_core::naming;
use trellis_core::{FuncContext, FuncDesc, Function, Registry, Result, RunResult, Value};

/// Operand count used until a block sets `#len`.
const OPERANDS_DEFAULT: usize = 2;
/// Hard cap on the operand count, whatever `#len` says.
const OPERANDS_MAX: usize = 16;

/// A number that stays integral as long as it can.
///
/// Folding in `i64` keeps `1 + 2` serializing as `3` rather than `3.0`;
/// overflow and any float operand switch the fold to `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn add(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map_or(Num::Float(a as f64 + b as f64), Num::Int),
            _ => Num::Float(self.as_f64() + other.as_f64()),
        }
    }

    fn sub(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_sub(b)
                .map_or(Num::Float(a as f64 - b as f64), Num::Int),
            _ => Num::Float(self.as_f64() - other.as_f64()),
        }
    }

    fn mul(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_mul(b)
                .map_or(Num::Float(a as f64 * b as f64), Num::Int),
            _ => Num::Float(self.as_f64() * other.as_f64()),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::int(i),
            Num::Float(f) => Value::float(f),
        }
    }
}

/// Effective operand count: `#len` clamped to the group cap, or the default
/// when unset.
fn group_len(ctx: &FuncContext<'_>) -> usize {
    ctx.input(naming::LEN)
        .as_i64()
        .map(|len| len.clamp(0, OPERANDS_MAX as i64) as usize)
        .unwrap_or(OPERANDS_DEFAULT)
}

/// Present operands in index order. Absent slots are skipped so a partially
/// wired block still computes; a present slot that is not a number names
/// itself in the error.
fn operands(ctx: &FuncContext<'_>) -> std::result::Result<Vec<Num>, String> {
    let mut out = Vec::new();
    for index in 0..group_len(ctx) {
        let value = ctx.input(&index.to_string());
        if value.is_absent() {
            continue;
        }
        if let Some(int) = value.as_i64() {
            out.push(Num::Int(int));
        } else if let Some(float) = value.as_f64() {
            out.push(Num::Float(float));
        } else {
            return Err(format!("operand {index} is not a number"));
        }
    }
    Ok(out)
}

fn fold(ctx: &FuncContext<'_>, op: fn(Num, Num) -> Num) -> RunResult {
    let nums = match operands(ctx) {
        Ok(nums) => nums,
        Err(msg) => return RunResult::Error(msg),
    };
    let mut iter = nums.into_iter();
    let Some(first) = iter.next() else {
        // Nothing wired yet; emitting an identity element would be noise.
        return RunResult::NoEmit;
    };
    RunResult::Output(iter.fold(first, op).into_value())
}

/// `math:add`. Sums the operand group.
#[derive(Debug, Default)]
pub struct AddFunction;

impl Function for AddFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        fold(ctx, Num::add)
    }
}

/// `math:subtract`. Subtracts every later operand from the first.
#[derive(Debug, Default)]
pub struct SubtractFunction;

impl Function for SubtractFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        fold(ctx, Num::sub)
    }
}

/// `math:multiply`. Multiplies the operand group.
#[derive(Debug, Default)]
pub struct MultiplyFunction;

impl Function for MultiplyFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        fold(ctx, Num::mul)
    }
}

/// Register the `math` base descriptor and the arithmetic functions.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_base(
        FuncDesc::new("math").category("math").group(
            PropGroupDesc::new("", OPERANDS_DEFAULT)
                .max(OPERANDS_MAX)
                .prop(PropDesc::new("", PropType::Number).pinned()),
        ),
    )?;
    registry.register(
        FuncDesc::new("math:add")
            .base("math")
            .prop(PropDesc::new(naming::OUTPUT, PropType::Number).readonly()),
        || Box::new(AddFunction),
    )?;
    registry.register(
        FuncDesc::new("math:subtract")
            .base("math")
            .prop(PropDesc::new(naming::OUTPUT, PropType::Number).readonly()),
        || Box::new(SubtractFunction),
    )?;
    registry.register(
        FuncDesc::new("math:multiply")
            .base("math")
            .prop(PropDesc::new(naming::OUTPUT, PropType::Number).readonly()),
        || Box::new(MultiplyFunction),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trellis_core::Root;

    use super::*;

    fn root() -> Root {
        let mut root = Root::new();
        crate::register_builtins(root.registry_mut()).unwrap();
        root
    }

    fn output_of(data: serde_json::Value) -> Value {
        let mut root = root();
        root.add_flow("f", Some(&json!({ "b": data }))).unwrap();
        root.run_all(8);
        root.value_at("f.b.#output").unwrap_or_default()
    }

    #[test]
    fn add_sums_integers() {
        let out = output_of(json!({"#is": "math:add", "0": 1, "1": 2}));
        assert_eq!(out.as_i64(), Some(3));
    }

    #[test]
    fn add_mixes_into_float() {
        let out = output_of(json!({"#is": "math:add", "0": 1, "1": 2.5}));
        assert_eq!(out.as_f64(), Some(3.5));
        assert_eq!(out.as_i64(), None);
    }

    #[test]
    fn subtract_folds_left() {
        let out = output_of(json!({"#is": "math:subtract", "#len": 3, "0": 10, "1": 4, "2": 1}));
        assert_eq!(out.as_i64(), Some(5));
    }

    #[test]
    fn multiply_respects_len() {
        // The third operand sits beyond #len and is ignored.
        let out = output_of(json!({"#is": "math:multiply", "#len": 2, "0": 3, "1": 4, "2": 99}));
        assert_eq!(out.as_i64(), Some(12));
    }

    #[test]
    fn absent_operands_are_skipped() {
        let out = output_of(json!({"#is": "math:add", "#len": 4, "0": 7, "3": 2}));
        assert_eq!(out.as_i64(), Some(9));
    }

    #[test]
    fn no_operands_emits_nothing() {
        let out = output_of(json!({"#is": "math:add"}));
        assert!(out.is_absent());
    }

    #[test]
    fn non_numeric_operand_becomes_error_event() {
        let out = output_of(json!({"#is": "math:add", "0": 1, "1": "x"}));
        let event = out.as_event().expect("error event");
        assert!(event.error_message().unwrap_or_default().contains("operand 1"));
    }

    #[test]
    fn overflow_falls_back_to_float() {
        let out = output_of(json!({"#is": "math:add", "0": i64::MAX, "1": 1}));
        assert_eq!(out.as_f64(), Some(i64::MAX as f64 + 1.0));
    }

    #[test]
    fn changing_an_operand_recomputes() {
        let mut root = root();
        root.add_flow("f", Some(&json!({"b": {"#is": "math:add", "0": 1, "1": 2}})))
            .unwrap();
        root.run_all(8);
        assert_eq!(root.value_at("f.b.#output").unwrap().as_i64(), Some(3));

        root.set_value_at("f.b.0", Value::int(10)).unwrap();
        root.run_all(8);
        assert_eq!(root.value_at("f.b.#output").unwrap().as_i64(), Some(12));
    }

    #[test]
    fn num_arithmetic() {
        assert_eq!(Num::Int(2).add(Num::Int(3)), Num::Int(5));
        assert_eq!(Num::Int(2).mul(Num::Float(0.5)), Num::Float(1.0));
        assert_eq!(Num::Int(10).sub(Num::Int(4)), Num::Int(6));
    }
}
