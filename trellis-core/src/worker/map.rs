//! Map-style fan-out: one input snapshot, one worker run per key.

use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::func::{FuncContext, Function, RunResult};
use crate::value::{DataMap, Value};
use crate::worker::{
    clear_worker_output, create_worker, destroy_worker, is_ready, output_json, output_path,
    reset_worker, worker_name, write_worker_inputs, ReusePolicy, WorkerPool,
};

#[derive(Default)]
struct KeyState {
    /// Assigned slot, `None` while waiting for pool capacity.
    slot: Option<usize>,
    deadline: Option<u64>,
    /// Finished result. Set exactly once per pass.
    result: Option<JsonValue>,
}

/// One fan-out of one input snapshot.
struct Pass {
    /// The snapshot being mapped. Elements are read from here, not from the
    /// live input property, so a superseding input cannot bleed into a pass
    /// already in flight.
    input: Value,
    /// Emit the aggregate as an array instead of an object.
    array: bool,
    /// Key states in input order, which is also aggregate order.
    keys: IndexMap<String, KeyState>,
}

/// Maps an object or array input over a worker template and emits the
/// aggregated results once every key finishes. Only the newest input is
/// honored: changes that arrive while a pass is in flight are mapped once,
/// from whatever the input holds when the pass completes.
#[derive(Default)]
pub(crate) struct MapFunction {
    pass: Option<Pass>,
    /// The last input that completed a pass. An idle run with an equal
    /// input does not re-map.
    last_input: Option<Value>,
    pool: Option<WorkerPool>,
    pool_size: i64,
    reuse: ReusePolicy,
    timeout_ms: u64,
    template: Value,
}

impl MapFunction {
    /// Pick up config inputs. Template and pool-kind changes abandon any
    /// pass in flight; a bounded-to-bounded size change resizes in place.
    fn sync_config(&mut self, ctx: &mut FuncContext<'_>) {
        self.reuse = ReusePolicy::from_value(&ctx.input("reuseWorker"));
        self.timeout_ms = ctx
            .input("timeout")
            .as_f64()
            .filter(|t| *t > 0.0)
            .map(|t| t as u64)
            .or(ctx.config().default_worker_timeout_ms)
            .unwrap_or(0);

        let template = ctx.input("template");
        if template != self.template {
            self.hard_reset(ctx);
            self.template = template;
        }

        let size = ctx
            .input("poolSize")
            .as_i64()
            .or(ctx.config().default_pool_size.map(|n| n as i64))
            .unwrap_or(0);
        if size != self.pool_size {
            let mut retired = Vec::new();
            let rebuild = match self.pool.as_mut() {
                Some(pool) if pool.is_bounded() && size > 0 => {
                    retired = pool.resize(size as usize).retired;
                    false
                }
                Some(_) => true,
                None => false,
            };
            let owner = ctx.block_id();
            for slot in retired {
                destroy_worker(ctx.engine(), owner, slot);
            }
            if rebuild {
                self.hard_reset(ctx);
            }
            self.pool_size = size;
        }
    }

    /// Abandon the current pass (if any) and destroy every worker scope.
    fn hard_reset(&mut self, ctx: &mut FuncContext<'_>) {
        if let Some(pass) = self.pass.take() {
            for (_, state) in pass.keys {
                if let Some(slot) = state.slot {
                    ctx.unsubscribe(&output_path(slot), slot as u64);
                }
            }
        }
        let owner = ctx.block_id();
        if let Some(mut pool) = self.pool.take() {
            for slot in pool.clear() {
                destroy_worker(ctx.engine(), owner, slot);
            }
        }
        self.last_input = None;
    }

    /// Idle entry: start a pass for `input`, or clear the output when there
    /// is nothing to map.
    fn begin(&mut self, ctx: &mut FuncContext<'_>, input: Value) -> RunResult {
        if self.last_input.as_ref() == Some(&input) {
            return RunResult::NoEmit;
        }
        if input.as_object().is_none() && input.as_array().is_none() {
            self.hard_reset(ctx);
            self.last_input = Some(input);
            return RunResult::Output(Value::Absent);
        }
        self.start_pass(input);
        self.service(ctx)
    }

    fn start_pass(&mut self, input: Value) {
        let mut keys = IndexMap::new();
        let array = input.as_array().is_some();
        if let Some(fields) = input.as_object() {
            for key in fields.keys() {
                keys.insert(key.clone(), KeyState::default());
            }
        } else if let Some(items) = input.as_array() {
            for index in 0..items.len() {
                keys.insert(index.to_string(), KeyState::default());
            }
        }
        self.pass = Some(Pass { input, array, keys });
    }

    /// Drive the pass: expire timeouts, assign waiting keys, and emit the
    /// aggregate once every key has a result.
    fn service(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        self.expire_deadlines(ctx);
        self.assign_pending(ctx);

        let complete = self
            .pass
            .as_ref()
            .is_some_and(|p| p.keys.values().all(|s| s.result.is_some()));
        if !complete {
            return RunResult::Wait;
        }
        let Some(pass) = self.pass.take() else {
            return RunResult::Wait;
        };
        let pass_input = pass.input.clone();
        let aggregate = Value::data(aggregate_json(pass));
        self.last_input = Some(pass_input.clone());

        let current = ctx.input("input");
        if current == pass_input {
            RunResult::Output(aggregate)
        } else {
            // A superseding input arrived mid-flight: publish this result
            // and immediately map the newest snapshot.
            ctx.emit(aggregate);
            self.begin(ctx, current)
        }
    }

    /// Turn every overdue in-flight key into a timeout error. The slot's
    /// completion subscription goes first, so a result racing the timeout
    /// cannot land after the error.
    fn expire_deadlines(&mut self, ctx: &mut FuncContext<'_>) {
        if self.timeout_ms == 0 {
            return;
        }
        let now = ctx.now();
        let mut expired = Vec::new();
        if let Some(pass) = self.pass.as_mut() {
            for (_, state) in pass.keys.iter_mut() {
                let Some(slot) = state.slot else { continue };
                if state.deadline.is_some_and(|d| d <= now) {
                    state.result = Some(json!({ "#error": "timeout" }));
                    state.slot = None;
                    expired.push(slot);
                }
            }
        }
        let owner = ctx.block_id();
        for slot in expired {
            ctx.unsubscribe(&output_path(slot), slot as u64);
            if let Some(pool) = self.pool.as_mut() {
                pool.done(slot, false);
            }
            // A worker that ran out its clock is in an unknown state; it is
            // never kept warm.
            destroy_worker(ctx.engine(), owner, slot);
        }
    }

    /// Hand out slots to keys still waiting for one. Stops at saturation;
    /// freed slots re-enter here on the run after the release.
    fn assign_pending(&mut self, ctx: &mut FuncContext<'_>) {
        if self.pool.is_none() {
            self.pool = Some(if self.pool_size > 0 {
                WorkerPool::bounded(self.pool_size as usize)
            } else {
                WorkerPool::unbounded()
            });
        }
        let template = self.template.clone();
        let reuse = self.reuse;
        let timeout = self.timeout_ms;
        let owner = ctx.block_id();
        let Some(pass) = self.pass.as_mut() else {
            return;
        };
        let Some(pool) = self.pool.as_mut() else {
            return;
        };
        let Pass { input, keys, .. } = pass;

        for (key, state) in keys.iter_mut() {
            if state.slot.is_some() || state.result.is_some() {
                continue;
            }
            let Some(slot) = pool.next(Some(key)) else {
                break;
            };
            let engine = ctx.engine();
            let worker = match engine.child_block(owner, &worker_name(slot)) {
                Some(worker) => {
                    if reuse != ReusePolicy::Persist {
                        reset_worker(engine, worker, &template);
                    }
                    Some(worker)
                }
                None => create_worker(engine, owner, slot, &template),
            };
            let Some(worker) = worker else {
                pool.done(slot, false);
                continue;
            };
            let changed = write_worker_inputs(ctx.engine(), worker, key, &input.field(key));
            if reuse == ReusePolicy::Persist && changed {
                // The retained output belongs to the previous inputs; a key
                // whose inputs changed must wait for a fresh result.
                clear_worker_output(ctx.engine(), worker);
            }
            state.slot = Some(slot);
            if timeout > 0 {
                let deadline = ctx.now() + timeout;
                state.deadline = Some(deadline);
                ctx.schedule_wake(deadline);
            }
            if !ctx.subscribe(&output_path(slot), slot as u64) {
                debug!(key, slot, "worker output path did not resolve");
            }
        }
    }
}

impl Function for MapFunction {
    fn run(&mut self, ctx: &mut FuncContext<'_>) -> RunResult {
        self.sync_config(ctx);
        if self.pass.is_some() {
            return self.service(ctx);
        }
        let input = ctx.input("input");
        self.begin(ctx, input)
    }

    fn source_changed(&mut self, ctx: &mut FuncContext<'_>, tag: u64, value: &Value) {
        if !is_ready(value) {
            return;
        }
        let slot = tag as usize;
        let keep = self.reuse.keeps_workers();
        let finished = self.pass.as_mut().is_some_and(|pass| {
            match pass
                .keys
                .values_mut()
                .find(|s| s.slot == Some(slot) && s.result.is_none())
            {
                Some(state) => {
                    state.result = Some(output_json(value));
                    state.slot = None;
                    true
                }
                None => false,
            }
        });
        if !finished {
            // Late delivery for a slot this pass no longer tracks.
            return;
        }
        ctx.unsubscribe(&output_path(slot), tag);
        let retained = self
            .pool
            .as_mut()
            .is_some_and(|pool| pool.done(slot, keep));
        if !retained {
            let owner = ctx.block_id();
            destroy_worker(ctx.engine(), owner, slot);
        }
        // Continue assignment and emission on the scheduler's clock.
        let block = ctx.block_id();
        ctx.engine().queue_block(block);
    }

    fn cancel(&mut self, ctx: &mut FuncContext<'_>, _reason: &Value) -> bool {
        let Some(pass) = self.pass.take() else {
            return false;
        };
        let keep = self.reuse.keeps_workers();
        let owner = ctx.block_id();
        for (_, state) in pass.keys {
            let Some(slot) = state.slot else { continue };
            // Completion callback goes away before any other side effect.
            ctx.unsubscribe(&output_path(slot), slot as u64);
            let retained = self
                .pool
                .as_mut()
                .is_some_and(|pool| pool.done(slot, keep));
            if !retained {
                destroy_worker(ctx.engine(), owner, slot);
            }
        }
        true
    }

    fn cleanup(&mut self, ctx: &mut FuncContext<'_>) {
        self.hard_reset(ctx);
    }
}

fn aggregate_json(pass: Pass) -> JsonValue {
    if pass.array {
        JsonValue::Array(
            pass.keys
                .into_values()
                .map(|state| state.result.unwrap_or(JsonValue::Null))
                .collect(),
        )
    } else {
        let mut map = DataMap::new();
        for (key, state) in pass.keys {
            map.insert(key, state.result.unwrap_or(JsonValue::Null));
        }
        JsonValue::Object(map)
    }
}
