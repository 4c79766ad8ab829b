//! Function registration and lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::func::descriptor::{FuncDesc, PropEntry};
use crate::func::{FuncMode, Function};
use crate::scheduler::PRIORITY_LEVELS;

type Factory = Box<dyn Fn() -> Box<dyn Function> + Send + Sync>;

struct RegEntry {
    desc: FuncDesc,
    /// Absent for abstract base descriptors.
    factory: Option<Factory>,
}

/// The id-to-function table consulted by `#is`.
///
/// A registration's `base` must already be present, so descriptor chains
/// are acyclic by construction.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<Arc<str>, RegEntry>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `desc` with a factory producing fresh instances.
    pub fn register<F>(&mut self, desc: FuncDesc, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Function> + Send + Sync + 'static,
    {
        self.insert(desc, Some(Box::new(factory)))
    }

    /// Register a descriptor-only entry for others to extend. `#is` cannot
    /// instantiate it.
    pub fn register_base(&mut self, desc: FuncDesc) -> Result<()> {
        self.insert(desc, None)
    }

    fn insert(&mut self, mut desc: FuncDesc, factory: Option<Factory>) -> Result<()> {
        if let Some(base) = &desc.base {
            if !self.entries.contains_key(base.as_str()) {
                return Err(EngineError::UnknownBase {
                    type_id: desc.id.clone(),
                    base: base.clone(),
                });
            }
        }
        if desc.priority >= PRIORITY_LEVELS {
            desc.priority = PRIORITY_LEVELS - 1;
        }
        self.entries
            .insert(Arc::from(desc.id.as_str()), RegEntry { desc, factory });
        Ok(())
    }

    /// Remove the entry registered under `id`. Returns whether anything was
    /// removed.
    ///
    /// Live function instances keep running; the id simply stops resolving
    /// for new `#is` assignments. Descriptors deriving from a removed base
    /// lose the inherited part of their property list until the base is
    /// registered again.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Instantiate the function registered under `id`.
    pub fn create(&self, id: &str) -> Result<Box<dyn Function>> {
        self.entries
            .get(id)
            .and_then(|entry| entry.factory.as_ref())
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnknownFunction {
                type_id: id.to_string(),
            })
    }

    /// Whether `id` is registered, as a function or a base.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// The descriptor registered under `id`.
    pub fn descriptor(&self, id: &str) -> Option<&FuncDesc> {
        self.entries.get(id).map(|entry| &entry.desc)
    }

    /// Default mode and priority for `id`, falling back to the global
    /// defaults when the id is unknown.
    pub fn defaults(&self, id: &str) -> (FuncMode, usize) {
        match self.descriptor(id) {
            Some(desc) => (desc.mode, desc.priority),
            None => (FuncMode::default(), crate::graph::DEFAULT_PRIORITY),
        }
    }

    /// Effective property list: the base chain walked root first, derived
    /// entries replacing same-named base entries in place.
    pub fn resolved_properties(&self, id: &str) -> Vec<PropEntry> {
        let mut chain: Vec<&FuncDesc> = Vec::new();
        let mut current = self.descriptor(id);
        while let Some(desc) = current {
            chain.push(desc);
            current = desc.base.as_deref().and_then(|b| self.descriptor(b));
        }
        let mut out: Vec<PropEntry> = Vec::new();
        for desc in chain.iter().rev() {
            for entry in &desc.properties {
                match out.iter_mut().find(|e| e.name() == entry.name()) {
                    Some(slot) => *slot = entry.clone(),
                    None => out.push(entry.clone()),
                }
            }
        }
        out
    }

    /// Nearest descriptor both ids extend (either id counts as its own
    /// ancestor).
    pub fn common_ancestor(&self, a: &str, b: &str) -> Option<Arc<str>> {
        let chain_of = |id: &str| {
            let mut chain: Vec<Arc<str>> = Vec::new();
            let mut current = Some(id.to_string());
            while let Some(id) = current {
                let entry = self.entries.get_key_value(id.as_str());
                let Some((key, reg)) = entry else { break };
                chain.push(key.clone());
                current = reg.desc.base.clone();
            }
            chain
        };
        let chain_a = chain_of(a);
        let chain_b = chain_of(b);
        chain_a
            .iter()
            .find(|id| chain_b.iter().any(|other| other == *id))
            .cloned()
    }

    /// All registered ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_ref())
    }
}
