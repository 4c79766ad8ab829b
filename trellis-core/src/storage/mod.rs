//! Pluggable flow persistence.
//!
//! A [`Storage`] moves opaque strings in and out of some backing store and
//! notifies listeners when a key changes through it. [`FlowStorage`] layers
//! the flow-shaped operations on top: JSON encoding, and the startup bulk
//! load that turns every stored key back into a live flow. The engine never
//! cares where the bytes live; [`MemoryStorage`] and [`FileStorage`] are the
//! two bundled backends.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::root::Root;

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Change callback: the key that changed and its new content, or `None`
/// when the key was deleted.
pub type StorageListener = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

/// Keys containing this marker belong to a flow's own nested store, not the
/// top-level flow namespace.
const NESTED_MARKER: &str = ".#";

/// A keyed string store with change notification.
pub trait Storage: Send + Sync {
    /// Persist `data` under `key`, replacing any previous content.
    fn save(&self, key: &str, data: &str) -> Result<()>;

    /// The content stored under `key`, if present.
    fn load(&self, key: &str) -> Option<String>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Every stored key, in no particular order.
    fn keys(&self) -> Vec<String>;

    /// Register `listener` for changes to `key`. One listener per key; a
    /// second registration replaces the first.
    fn listen(&self, key: &str, listener: StorageListener);

    /// Drop the listener for `key`, if any.
    fn unlisten(&self, key: &str);
}

/// Flow-level operations over any [`Storage`].
///
/// Everything here has a default body; backends only implement the raw
/// string store and get the JSON layer for free.
pub trait FlowStorage: Storage {
    /// Serialize and persist one flow.
    fn save_flow(&self, name: &str, data: &JsonValue) -> Result<()> {
        let text = serde_json::to_string_pretty(data).map_err(|e| EngineError::Serialization {
            key: name.to_string(),
            cause: e.to_string(),
        })?;
        self.save(name, &text)
    }

    /// Load and parse one flow. `Ok(None)` means the key does not exist;
    /// unparseable content is an error.
    fn load_flow(&self, name: &str) -> Result<Option<JsonValue>> {
        let Some(text) = self.load(name) else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| EngineError::Serialization {
                key: name.to_string(),
                cause: e.to_string(),
            })
    }

    /// Remove one flow's persisted form.
    fn delete_flow(&self, name: &str) -> Result<()> {
        self.delete(name)
    }

    /// Load every stored flow into `root` and return the names that loaded.
    ///
    /// Keys load in name order, so a parent flow like `a` is in place before
    /// a nested `a.b`. Keys carrying the nested-store marker are skipped, as
    /// is anything that fails to parse: one bad entry does not block the
    /// rest of startup.
    fn init(&self, root: &mut Root) -> Vec<String> {
        let mut names = self.keys();
        names.sort();
        let mut loaded = Vec::new();
        for name in names {
            if name.contains(NESTED_MARKER) {
                continue;
            }
            let Some(text) = self.load(&name) else {
                continue;
            };
            let data: JsonValue = match serde_json::from_str(&text) {
                Ok(json) => json,
                Err(err) => {
                    warn!(flow = %name, %err, "stored flow is not valid JSON, skipped");
                    continue;
                }
            };
            match root.add_flow(&name, Some(&data)) {
                Ok(_) => loaded.push(name),
                Err(err) => warn!(flow = %name, %err, "stored flow rejected"),
            }
        }
        loaded
    }
}

impl<S: Storage + ?Sized> FlowStorage for S {}
