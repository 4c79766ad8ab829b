//! The engine's front door.
//!
//! A [`Root`] owns one graph: the hidden container block, the scheduler,
//! the registry, the clock, and optionally a storage backend. Hosts create
//! flows under it, read and write properties by path, and pump the engine
//! with [`run`](Root::run). Everything else in the crate is reached through
//! this type.

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::clock::{EngineClock, RealClock};
use crate::config::RootConfig;
use crate::error::{EngineError, Result};
use crate::func::Registry;
use crate::graph::engine::Engine;
use crate::graph::naming;
use crate::storage::{FlowStorage, Storage};
use crate::types::{BlockId, TaskId, WatchId};
use crate::value::Value;
use crate::worker;

/// One change observed by a storage listener, applied at the next `run`.
struct StorageChange {
    name: String,
    data: Option<String>,
}

/// Listeners may fire from a host thread; changes queue here and the
/// engine applies them on its own thread.
type Inbox = Arc<Mutex<VecDeque<StorageChange>>>;

/// One engine instance: graph, scheduler, registry, clock, and storage.
pub struct Root {
    engine: Engine,
    storage: Option<Box<dyn FlowStorage>>,
    inbox: Inbox,
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

impl Root {
    /// An empty root with default configuration, a system clock, and the
    /// built-in fan-out functions registered.
    pub fn new() -> Self {
        Self::with_config(RootConfig::default())
    }

    /// An empty root with the given configuration.
    pub fn with_config(config: RootConfig) -> Self {
        let mut registry = Registry::new();
        worker::register(&mut registry);
        Self {
            engine: Engine::new(config, Arc::new(RealClock), registry),
            storage: None,
            inbox: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Replace the clock. Call before anything schedules a wake.
    pub fn with_clock(mut self, clock: Arc<dyn EngineClock>) -> Self {
        self.engine.clock = clock;
        self
    }

    /// Replace the registry. The built-in fan-out functions are added to
    /// whatever is passed in, so `map` and `multi` are always available.
    pub fn with_registry(mut self, mut registry: Registry) -> Self {
        worker::register(&mut registry);
        self.engine.registry = registry;
        self
    }

    /// Attach a storage backend and immediately load every flow it holds.
    ///
    /// Attach storage last: stored flows come alive during this call, so
    /// the functions they name must already be registered.
    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        let loaded = storage.init(&mut self);
        for name in &loaded {
            Self::listen_for(&storage, &self.inbox, name);
        }
        debug!(flows = loaded.len(), "storage attached");
        self.storage = Some(Box::new(storage));
        self
    }

    fn listen_for(storage: &dyn Storage, inbox: &Inbox, name: &str) {
        let inbox = inbox.clone();
        let flow = name.to_string();
        storage.listen(
            name,
            Arc::new(move |_, data| {
                inbox.lock().push_back(StorageChange {
                    name: flow.clone(),
                    data: data.map(String::from),
                });
            }),
        );
    }

    /// The active configuration.
    pub fn config(&self) -> &RootConfig {
        &self.engine.config
    }

    /// The function registry.
    pub fn registry(&self) -> &Registry {
        &self.engine.registry
    }

    /// Mutable access to the function registry.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.engine.registry
    }

    /// Current engine time, read from the attached clock.
    pub fn now_millis(&self) -> u64 {
        self.engine.clock.now_millis()
    }

    // =========================================================================
    // Flow management
    // =========================================================================

    /// Create a named flow, optionally populated from serialized data.
    ///
    /// Dotted names nest: `"app.sub"` creates a flow `sub` inside the
    /// existing flow `app`. The new flow is persisted and watched if
    /// storage is attached.
    pub fn add_flow(&mut self, name: &str, data: Option<&JsonValue>) -> Result<BlockId> {
        if !name.split('.').all(naming::valid_segment) {
            return Err(EngineError::PathSyntax {
                path: name.to_string(),
                cause: "flow names are dot-separated plain segments".to_string(),
            });
        }
        let data_map = match data {
            None => None,
            Some(JsonValue::Object(map)) => Some(map),
            Some(_) => {
                return Err(EngineError::MalformedFlow {
                    name: name.to_string(),
                    cause: "flow data must be an object".to_string(),
                })
            }
        };
        let (owner, leaf) = match name.rsplit_once('.') {
            Some((parent, leaf)) => (self.engine.resolve_block(parent)?, leaf),
            None => (self.engine.root_block, name),
        };
        if self.engine.child_block(owner, leaf).is_some() {
            return Err(EngineError::FlowExists {
                name: name.to_string(),
            });
        }

        let flow = self.engine.create_block(owner, leaf, true)?;
        if let Some(map) = data_map {
            self.engine.load_block(flow, map);
        }
        debug!(flow = %name, "flow added");

        if let Some(storage) = &self.storage {
            let saved = self.engine.save_block(flow);
            if let Err(err) = storage.save_flow(name, &saved) {
                warn!(flow = %name, %err, "flow persistence failed");
            }
            Self::listen_for(storage.as_ref(), &self.inbox, name);
        }
        Ok(flow)
    }

    /// Destroy a flow and remove its persisted form.
    pub fn delete_flow(&mut self, name: &str) -> Result<()> {
        let flow = self.flow_block(name)?;
        if let Some(storage) = &self.storage {
            storage.unlisten(name);
            if let Err(err) = storage.delete_flow(name) {
                warn!(flow = %name, %err, "flow deletion not persisted");
            }
        }
        // Clearing the owning property tears the block down through the
        // ordinary ownership path, so listeners see the change.
        if let Some(prop) = self.engine.blocks.get(flow).and_then(|node| node.owner_prop) {
            self.engine.set_value(prop, Value::Absent);
        }
        debug!(flow = %name, "flow deleted");
        Ok(())
    }

    /// Serialize a flow, persisting it if storage is attached.
    pub fn save_flow(&self, name: &str) -> Result<JsonValue> {
        let flow = self.flow_block(name)?;
        let data = self.engine.save_block(flow);
        if let Some(storage) = &self.storage {
            storage.save_flow(name, &data)?;
        }
        Ok(data)
    }

    /// Names of the top-level flows, in creation order.
    pub fn flow_names(&self) -> Vec<String> {
        let Some(node) = self.engine.blocks.get(self.engine.root_block) else {
            return Vec::new();
        };
        node.props
            .iter()
            .filter_map(|(name, prop)| {
                let child = self.engine.props.get(*prop)?.value.as_block()?;
                self.engine
                    .blocks
                    .get(child)?
                    .is_flow
                    .then(|| name.to_string())
            })
            .collect()
    }

    fn flow_block(&self, name: &str) -> Result<BlockId> {
        let not_found = || EngineError::FlowNotFound {
            name: name.to_string(),
        };
        if name.is_empty() {
            return Err(not_found());
        }
        let block = self.engine.resolve_block(name).map_err(|_| not_found())?;
        if !self.engine.blocks.get(block).is_some_and(|node| node.is_flow) {
            return Err(not_found());
        }
        Ok(block)
    }

    // =========================================================================
    // Path access
    // =========================================================================

    /// Current value of the property at an absolute dotted path.
    pub fn value_at(&self, path: &str) -> Result<Value> {
        let prop = self.engine.resolve_prop(path)?;
        Ok(self.engine.prop_value(prop))
    }

    /// Explicitly set the property at an absolute dotted path, creating the
    /// final property on a resolved block if needed.
    pub fn set_value_at(&mut self, path: &str, value: Value) -> Result<()> {
        let prop = self.engine.ensure_prop_path(path)?;
        self.engine.set_value(prop, value);
        Ok(())
    }

    /// Bind the property at `path` to `target`, a path relative to the
    /// property's own block. `None` unbinds.
    pub fn set_binding_at(&mut self, path: &str, target: Option<&str>) -> Result<()> {
        let prop = self.engine.ensure_prop_path(path)?;
        self.engine.set_binding(prop, target);
        Ok(())
    }

    /// Resolve an absolute dotted path to a block.
    pub fn block_at(&self, path: &str) -> Result<BlockId> {
        match self.engine.resolve_block(path) {
            Ok(block) => Ok(block),
            Err(err) => {
                // Distinguish "holds data, not a block" from "nothing there".
                if self.engine.resolve_prop(path).is_ok() {
                    return Err(EngineError::NotABlock {
                        path: path.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Register a callback on the property at `path`. It fires once with
    /// the current value and then on every accepted change.
    pub fn watch(
        &mut self,
        path: &str,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> Result<WatchId> {
        let prop = self.engine.ensure_prop_path(path)?;
        Ok(self.engine.watch_prop(prop, Box::new(callback)))
    }

    /// Remove a watch registered through [`Root::watch`].
    pub fn unwatch(&mut self, id: WatchId) {
        self.engine.unwatch(id);
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// One engine pass: apply storage changes, fire due timers, resolve the
    /// queues, and drain after-pass flushes. Returns the number of function
    /// runs performed.
    pub fn run(&mut self) -> usize {
        self.apply_storage_changes();
        self.engine.fire_due_timers();
        let ran = self.engine.resolve();
        self.engine.drain_after_pass();
        ran
    }

    /// Run passes until the engine goes idle, up to `max_passes`. Returns
    /// the total number of function runs.
    pub fn run_all(&mut self, max_passes: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_passes {
            total += self.run();
            if self.is_idle() {
                break;
            }
        }
        total
    }

    /// Queue every block whose wake time has arrived, without resolving.
    pub fn run_timers(&mut self) -> usize {
        self.engine.fire_due_timers()
    }

    /// Nothing queued, buffered, or due right now. Timers set for the
    /// future do not count; advance the clock and `run` again for those.
    pub fn is_idle(&self) -> bool {
        let now = self.engine.clock.now_millis();
        let timer_due = matches!(self.engine.timers.peek(), Some(Reverse((at, _))) if *at <= now);
        !timer_due
            && self.engine.resolver.is_idle()
            && self.engine.pending_pokes.is_empty()
            && self.engine.after_pass.is_empty()
            && self.inbox.lock().is_empty()
    }

    /// Resolve a deferred run ticket from outside the engine. Returns
    /// `false` for stale or invalidated tickets.
    pub fn complete_task(
        &mut self,
        task: TaskId,
        outcome: std::result::Result<Value, String>,
    ) -> bool {
        self.engine.complete_task(task, outcome)
    }

    /// Install a host callback that fires whenever work appears on an idle
    /// scheduler, so a host event loop knows to call [`run`](Root::run).
    pub fn set_schedule_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.engine.schedule_hook = Some(Box::new(hook));
    }

    fn apply_storage_changes(&mut self) {
        loop {
            let change = self.inbox.lock().pop_front();
            let Some(change) = change else {
                break;
            };
            let Ok(flow) = self.flow_block(&change.name) else {
                // Already deleted on this side, or never loaded.
                continue;
            };
            match change.data {
                Some(text) => match serde_json::from_str::<JsonValue>(&text) {
                    Ok(JsonValue::Object(map)) => {
                        if self.engine.live_update_block(flow, &map) {
                            debug!(flow = %change.name, "flow reloaded from storage");
                        }
                    }
                    Ok(_) => {
                        warn!(flow = %change.name, "stored flow is not an object, change ignored")
                    }
                    Err(err) => {
                        warn!(flow = %change.name, %err, "stored flow change is not valid JSON, ignored")
                    }
                },
                None => {
                    // The persisted form disappeared behind the engine.
                    if let Some(storage) = &self.storage {
                        storage.unlisten(&change.name);
                    }
                    if let Some(prop) =
                        self.engine.blocks.get(flow).and_then(|node| node.owner_prop)
                    {
                        self.engine.set_value(prop, Value::Absent);
                    }
                    debug!(flow = %change.name, "flow removed with its storage");
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}
