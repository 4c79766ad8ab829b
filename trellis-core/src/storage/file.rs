//! Flow files on disk, one JSON document per key.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{EngineError, Result, ResultExt};
use crate::storage::{Storage, StorageListener};

/// Directory-backed storage. Each key becomes `{key}.json` directly under
/// the root directory; dotted flow names stay dotted in the file name.
///
/// Listeners see writes made through this instance only. External edits to
/// the files are picked up by `load`/`keys` but are not watched.
pub struct FileStorage {
    dir: PathBuf,
    listeners: Mutex<HashMap<String, StorageListener>>,
}

impl FileStorage {
    /// Open `dir` as a storage root, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| EngineError::StorageDir {
            path: dir.clone(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            dir,
            listeners: Mutex::new(HashMap::new()),
        })
    }

    /// The storage root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a key maps to. `None` for keys that would escape the
    /// storage directory.
    fn checked_file(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) {
            return None;
        }
        Some(self.dir.join(format!("{key}.json")))
    }

    fn bad_key(key: &str) -> EngineError {
        EngineError::Storage {
            key: key.to_string(),
            cause: "key must be a non-empty name without path separators".to_string(),
        }
    }

    fn notify(&self, key: &str, data: Option<&str>) {
        let listener = self.listeners.lock().get(key).cloned();
        if let Some(listener) = listener {
            listener(key, data);
        }
    }
}

/// Write through a sibling temp file and rename into place, so readers
/// never observe a half-written flow.
fn write_atomic(path: &Path, tmp: &Path, data: &str) -> std::io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(data.as_bytes())?;
    file.sync_all()?;
    fs::rename(tmp, path)
}

impl Storage for FileStorage {
    fn save(&self, key: &str, data: &str) -> Result<()> {
        let path = self.checked_file(key).ok_or_else(|| Self::bad_key(key))?;
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        write_atomic(&path, &tmp, data).with_key(key)?;
        self.notify(key, Some(data));
        Ok(())
    }

    fn load(&self, key: &str) -> Option<String> {
        let path = self.checked_file(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(key, %err, "flow file unreadable");
                None
            }
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.checked_file(key).ok_or_else(|| Self::bad_key(key))?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err).with_key(key),
        }
        self.notify(key, None);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), %err, "storage directory unreadable");
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if !path.is_file() || path.extension()? != "json" {
                    return None;
                }
                Some(path.file_stem()?.to_str()?.to_string())
            })
            .collect()
    }

    fn listen(&self, key: &str, listener: StorageListener) {
        self.listeners.lock().insert(key.to_string(), listener);
    }

    fn unlisten(&self, key: &str) {
        self.listeners.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn save_load_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path()).unwrap();

        store.save("main", "{\"a\": 1}").unwrap();
        assert!(dir.path().join("main.json").is_file());
        assert_eq!(store.load("main").as_deref(), Some("{\"a\": 1}"));

        store.delete("main").unwrap();
        assert_eq!(store.load("main"), None);
        store.delete("main").unwrap();
    }

    #[test]
    fn dotted_names_stay_flat() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path()).unwrap();
        store.save("app.sub", "{}").unwrap();
        assert!(dir.path().join("app.sub.json").is_file());
        assert_eq!(store.keys(), vec!["app.sub".to_string()]);
    }

    #[test]
    fn keys_skip_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path()).unwrap();
        store.save("flow", "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("stale.json.tmp"), "x").unwrap();
        assert_eq!(store.keys(), vec!["flow".to_string()]);
    }

    #[test]
    fn separator_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path()).unwrap();
        assert!(store.save("../escape", "{}").is_err());
        assert!(store.save("", "{}").is_err());
        assert_eq!(store.load("../escape"), None);
    }

    #[test]
    fn listener_fires_on_save_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path()).unwrap();
        let seen: Arc<Mutex<Vec<Option<String>>>> = Default::default();
        let log = seen.clone();
        store.listen(
            "main",
            Arc::new(move |_, data| {
                log.lock().push(data.map(String::from));
            }),
        );

        store.save("main", "one").unwrap();
        store.delete("main").unwrap();
        assert_eq!(*seen.lock(), vec![Some("one".to_string()), None]);
    }

    #[test]
    fn second_instance_sees_persisted_flows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStorage::new(dir.path()).unwrap();
            store.save("kept", "{\"v\": 2}").unwrap();
        }
        let store = FileStorage::new(dir.path()).unwrap();
        assert_eq!(store.keys(), vec!["kept".to_string()]);
        assert_eq!(store.load("kept").as_deref(), Some("{\"v\": 2}"));
    }

    #[test]
    fn creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/flows");
        let store = FileStorage::new(&nested).unwrap();
        store.save("x", "{}").unwrap();
        assert!(nested.join("x.json").is_file());
    }
}
