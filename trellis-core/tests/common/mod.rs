//! Shared helpers for driving a root through its public surface.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use trellis_core::naming;
use trellis_core::prelude::*;

/// Run order observed by recorder blocks, oldest first.
pub type RunLog = Arc<Mutex<Vec<String>>>;

/// Records every run under the block's own name and passes `input` through
/// to `#output`, so recorder blocks chain through bindings.
pub struct RecorderFunction {
    log: RunLog,
}

impl Function for RecorderFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        let path = ctx.path();
        let name = path.rsplit('.').next().unwrap_or(&path);
        self.log.lock().push(name.to_string());
        RunResult::Output(ctx.input("input"))
    }
}

/// Sums `a` and `b` on load. Operands that are not numbers count as zero.
pub struct SumFunction;

impl Function for SumFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        let a = ctx.input("a").as_f64().unwrap_or(0.0);
        let b = ctx.input("b").as_f64().unwrap_or(0.0);
        RunResult::Output(Value::float(a + b))
    }
}

/// Counts its own runs. The output tells apart a function instance that
/// survived from one that was rebuilt.
#[derive(Default)]
pub struct CounterFunction {
    runs: i64,
}

impl Function for CounterFunction {
    fn run(&mut self, _ctx: &mut FuncContext<'_>) -> RunResult {
        self.runs += 1;
        RunResult::Output(Value::int(self.runs))
    }
}

/// Passes `input` through, except when `key` is `"stuck"`: that one never
/// produces an output.
pub struct StallFunction;

impl Function for StallFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        if ctx.input("key").as_str() == Some("stuck") {
            return RunResult::Wait;
        }
        RunResult::Output(ctx.input("input"))
    }
}

/// A registry carrying `test:recorder` (change-triggered) and `test:sum`,
/// `test:count`, `test:stall` (load-triggered).
pub fn test_registry(log: &RunLog) -> Registry {
    let mut registry = Registry::new();

    let recorder = FuncDesc::new("test:recorder")
        .mode(FuncMode::OnChange)
        .category("test")
        .prop(PropDesc::new("input", PropType::Any).pinned())
        .prop(PropDesc::new(naming::OUTPUT, PropType::Any).readonly());
    let log = log.clone();
    registry
        .register(recorder, move || {
            Box::new(RecorderFunction { log: log.clone() })
        })
        .unwrap();

    let sum = FuncDesc::new("test:sum")
        .category("test")
        .prop(PropDesc::new("a", PropType::Number).pinned())
        .prop(PropDesc::new("b", PropType::Number).pinned())
        .prop(PropDesc::new(naming::OUTPUT, PropType::Number).readonly());
    registry.register(sum, || Box::new(SumFunction)).unwrap();

    let count = FuncDesc::new("test:count")
        .category("test")
        .prop(PropDesc::new("input", PropType::Any).pinned())
        .prop(PropDesc::new(naming::OUTPUT, PropType::Number).readonly());
    registry
        .register(count, || Box::new(CounterFunction::default()))
        .unwrap();

    let stall = FuncDesc::new("test:stall")
        .category("test")
        .prop(PropDesc::new("input", PropType::Any).pinned())
        .prop(PropDesc::new("key", PropType::String))
        .prop(PropDesc::new(naming::OUTPUT, PropType::Any).readonly());
    registry.register(stall, || Box::new(StallFunction)).unwrap();

    registry
}

/// A root with the test registry installed.
pub fn test_root(log: &RunLog) -> Root {
    Root::new().with_registry(test_registry(log))
}
