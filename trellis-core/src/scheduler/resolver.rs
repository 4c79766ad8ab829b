//! The resolver: four priority levels above a shared arrival buffer.
//!
//! Queued blocks first land in the wait buffer in trigger order. Each
//! distribution step moves the whole buffer onto the per-level stacks,
//! newest pushed first, so the oldest arrival sits on top and a fresh batch
//! runs in the order it was triggered. Blocks queued mid-pass are
//! distributed the same way and therefore run before entries that were
//! already parked at that level.
//!
//! Levels drain lowest first. After every run the resolver re-distributes
//! and, while working at level 1 or deeper, restarts from level 0 whenever
//! the run produced work at a lower level. Level 0 itself drains straight
//! through.

use std::collections::HashMap;

use tracing::{trace, warn};

use crate::event::Event;
use crate::func::{FuncContext, RunResult};
use crate::graph::engine::Engine;
use crate::types::BlockId;
use crate::value::Value;

/// Number of scheduler priority levels. Priority 0 runs first.
pub const PRIORITY_LEVELS: usize = 4;

pub(crate) struct Resolver {
    /// Arrival buffer, oldest first.
    pub wait: Vec<BlockId>,
    /// Per-level stacks, popped from the top.
    pub levels: [Vec<BlockId>; PRIORITY_LEVELS],
    pub resolving: bool,
    /// The host hook has fired and no resolve has consumed it yet.
    pub scheduled: bool,
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            wait: Vec::new(),
            levels: Default::default(),
            resolving: false,
            scheduled: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.wait.is_empty() && self.levels.iter().all(|l| l.is_empty())
    }
}

impl Engine {
    /// Put `block` in line to run. Queueing an already queued block is a
    /// no-op; its eventual run sees the latest values anyway.
    pub fn queue_block(&mut self, block: BlockId) {
        let Some(node) = self.blocks.get_mut(block) else {
            return;
        };
        if node.queued {
            return;
        }
        node.queued = true;
        node.queue_to_run = true;
        self.resolver.wait.push(block);
        if !self.resolver.resolving && !self.resolver.scheduled {
            self.resolver.scheduled = true;
            if let Some(hook) = self.schedule_hook.as_mut() {
                hook();
            }
        }
    }

    /// Move everything from the wait buffer onto the level stacks.
    fn split_queue(&mut self) {
        let mut drained = std::mem::take(&mut self.resolver.wait);
        drained.reverse();
        for block in drained {
            let Some(node) = self.blocks.get_mut(block) else {
                continue;
            };
            if !node.queued {
                continue;
            }
            let level = node.effective_priority();
            if level >= PRIORITY_LEVELS {
                node.queued = false;
                node.queue_to_run = false;
                warn!(block = %block, level, "priority outside scheduler range; dropping run");
                continue;
            }
            self.resolver.levels[level].push(block);
        }
    }

    /// Pop-side flag consumption. Clears both flags so that a change during
    /// the block's own run can queue it again, and filters out entries whose
    /// block meanwhile lost its function or got disabled.
    fn take_run_flag(&mut self, block: BlockId) -> bool {
        let Some(node) = self.blocks.get_mut(block) else {
            return false;
        };
        if !node.queue_to_run {
            node.queued = false;
            return false;
        }
        node.queued = false;
        node.queue_to_run = false;
        if node.disabled || node.func.is_none() {
            return false;
        }
        true
    }

    /// Run queued blocks until the queues are empty. Returns the number of
    /// runs performed.
    pub fn resolve(&mut self) -> usize {
        if self.resolver.resolving {
            return 0;
        }
        self.resolver.resolving = true;
        self.resolver.scheduled = false;
        let cap = self.config.max_passes;
        let mut run_counts: HashMap<BlockId, usize> = HashMap::new();
        let mut ran = 0;

        'sweep: loop {
            self.split_queue();

            while let Some(block) = self.resolver.levels[0].pop() {
                if !self.take_run_flag(block) {
                    continue;
                }
                if exceeded(&mut run_counts, block, cap) {
                    continue;
                }
                self.run_block(block);
                ran += 1;
                self.split_queue();
            }

            for level in 1..PRIORITY_LEVELS {
                while let Some(block) = self.resolver.levels[level].pop() {
                    if !self.take_run_flag(block) {
                        continue;
                    }
                    if exceeded(&mut run_counts, block, cap) {
                        continue;
                    }
                    self.run_block(block);
                    ran += 1;
                    self.split_queue();
                    if self.resolver.levels[..level].iter().any(|l| !l.is_empty()) {
                        continue 'sweep;
                    }
                }
            }

            if self.resolver.is_idle() {
                break;
            }
        }

        self.resolver.resolving = false;
        trace!(ran, "resolve finished");
        ran
    }

    /// Run a single block's function now. Used by the resolver and by
    /// synchronous blocks reacting inline to an input write.
    pub fn run_block(&mut self, block: BlockId) {
        let (mut func, func_id) = {
            let Some(node) = self.blocks.get_mut(block) else {
                return;
            };
            if node.running || node.disabled {
                return;
            }
            let Some(func) = node.func.take() else {
                return;
            };
            node.running = true;
            // Absorb any pending queued run; a stale queue entry is then
            // skipped when the resolver reaches it.
            node.queue_to_run = false;
            (func, node.func_id.clone())
        };

        let result = {
            let mut ctx = FuncContext::new(self, block);
            func.run(&mut ctx)
        };

        // `running` still set with the same id means nobody replaced the
        // function while it ran; put the instance back. Otherwise the old
        // instance winds down here, since `replace_function` could not reach
        // it while it was checked out.
        let restore = match self.blocks.get_mut(block) {
            Some(node) => {
                let keep = node.running && node.func_id == func_id;
                node.running = false;
                keep
            }
            None => false,
        };
        if !restore {
            let mut ctx = FuncContext::new(self, block);
            func.cleanup(&mut ctx);
            func.destroy();
            self.flush_pokes();
            return;
        }
        if let Some(node) = self.blocks.get_mut(block) {
            node.func = Some(func);
        }
        self.apply_run_result(block, result);
        self.flush_pokes();
    }

    /// Fold a run's outcome into the block's output and wait fields.
    pub(crate) fn apply_run_result(&mut self, block: BlockId, result: RunResult) {
        match result {
            RunResult::Output(value) => {
                self.clear_wait(block);
                self.emit_output(block, value);
            }
            RunResult::Done | RunResult::NoEmit => {
                self.clear_wait(block);
            }
            RunResult::Wait => {
                self.set_wait(block);
            }
            RunResult::Error(message) => {
                warn!(block = %self.block_path(block), %message, "run failed");
                self.clear_wait(block);
                self.emit_output(block, Value::Event(Event::error(message)));
            }
            RunResult::Deferred(_task) => {
                self.set_wait(block);
            }
        }
    }
}

fn exceeded(counts: &mut HashMap<BlockId, usize>, block: BlockId, cap: usize) -> bool {
    let count = counts.entry(block).or_insert(0);
    *count += 1;
    if *count > cap {
        warn!(%block, cap, "block exceeded run cap in one resolve, dropping");
        true
    } else {
        false
    }
}
