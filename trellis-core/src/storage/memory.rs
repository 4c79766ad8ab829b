//! In-memory storage for tests and ephemeral engines.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{Storage, StorageListener};

/// A key-value store held entirely in memory.
///
/// Clones share the same store, which lets a test keep a handle to the data
/// while the engine owns another.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, String>,
    listeners: HashMap<String, StorageListener>,
}

impl MemoryStorage {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn save(&self, key: &str, data: &str) -> Result<()> {
        let listener = {
            let mut inner = self.inner.lock();
            inner.entries.insert(key.to_string(), data.to_string());
            inner.listeners.get(key).cloned()
        };
        // Fired outside the lock so a listener may re-enter the store.
        if let Some(listener) = listener {
            listener(key, Some(data));
        }
        Ok(())
    }

    fn load(&self, key: &str) -> Option<String> {
        self.inner.lock().entries.get(key).cloned()
    }

    fn delete(&self, key: &str) -> Result<()> {
        let listener = {
            let mut inner = self.inner.lock();
            if inner.entries.remove(key).is_none() {
                return Ok(());
            }
            inner.listeners.get(key).cloned()
        };
        if let Some(listener) = listener {
            listener(key, None);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    fn listen(&self, key: &str, listener: StorageListener) {
        self.inner.lock().listeners.insert(key.to_string(), listener);
    }

    fn unlisten(&self, key: &str) {
        self.inner.lock().listeners.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_delete() {
        let store = MemoryStorage::new();
        assert!(store.is_empty());

        store.save("a", "one").unwrap();
        store.save("a", "two").unwrap();
        store.save("b", "three").unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.load("a").as_deref(), Some("two"));
        assert_eq!(store.load("missing"), None);

        store.delete("a").unwrap();
        assert_eq!(store.load("a"), None);
        // Deleting again is fine.
        store.delete("a").unwrap();
    }

    #[test]
    fn clones_share_the_store() {
        let store = MemoryStorage::new();
        let other = store.clone();
        store.save("k", "v").unwrap();
        assert_eq!(other.load("k").as_deref(), Some("v"));
    }

    #[test]
    fn listener_sees_saves_and_deletes() {
        let store = MemoryStorage::new();
        let seen: Arc<Mutex<Vec<(String, Option<String>)>>> = Default::default();
        let log = seen.clone();
        store.listen(
            "watched",
            Arc::new(move |key, data| {
                log.lock().push((key.to_string(), data.map(String::from)));
            }),
        );

        store.save("watched", "x").unwrap();
        store.save("other", "y").unwrap();
        store.delete("watched").unwrap();
        // Deleting an absent key fires nothing.
        store.delete("watched").unwrap();

        let events = seen.lock().clone();
        assert_eq!(
            events,
            vec![
                ("watched".to_string(), Some("x".to_string())),
                ("watched".to_string(), None),
            ]
        );
    }

    #[test]
    fn unlisten_stops_notifications() {
        let store = MemoryStorage::new();
        let seen: Arc<Mutex<usize>> = Default::default();
        let count = seen.clone();
        store.listen(
            "k",
            Arc::new(move |_, _| {
                *count.lock() += 1;
            }),
        );
        store.save("k", "1").unwrap();
        store.unlisten("k");
        store.save("k", "2").unwrap();
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn listener_may_reenter_the_store() {
        let store = MemoryStorage::new();
        let inner = store.clone();
        let seen: Arc<Mutex<Option<String>>> = Default::default();
        let out = seen.clone();
        store.listen(
            "k",
            Arc::new(move |key, _| {
                *out.lock() = inner.load(key);
            }),
        );
        store.save("k", "fresh").unwrap();
        assert_eq!(seen.lock().as_deref(), Some("fresh"));
    }
}
