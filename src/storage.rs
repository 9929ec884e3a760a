//! Local key-value persistence. One JSON document per key, either on disk
//! (`FileStore`, one file per key) or in memory (`MemoryStore`, used by tests
//! and ephemeral sessions). All pipeline/cache persistence is best-effort:
//! callers that must never fail go through [`mirror`], which swallows write
//! errors after logging them.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::StorageError;
use crate::types::{CaseId, RuleId};

pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get_raw(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    store.put_raw(key, &raw)
}

/// Best-effort write: storage failures (quota, permissions, poisoned lock)
/// must never surface to pipeline callers, so they are logged and dropped.
pub fn mirror<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    if let Err(e) = put_json(store, key, value) {
        log::warn!("skipping state mirror for {key}: {e}");
    }
}

pub fn case_key(id: &CaseId) -> String {
    format!("case_{id}")
}

pub fn agent_state_key(id: &CaseId) -> String {
    format!("agent_state_{id}")
}

pub fn rule_key(rule: &RuleId, age_months: u32) -> String {
    format!("rule_{rule}_{age_months}")
}

/// Directory-backed store: `<dir>/<key>.json` per entry.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Io(std::io::Error::other("store mutex poisoned")))
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        put_json(&store, "case_abc", &serde_json::json!({"risk": "monitor"})).unwrap();
        let back: Option<serde_json::Value> = get_json(&store, "case_abc").unwrap();
        assert_eq!(back.unwrap()["risk"], "monitor");
    }

    #[test]
    fn file_store_missing_key_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let got: Option<serde_json::Value> = get_json(&store, "case_missing").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn file_store_creates_dir_on_put() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("nested/cases"));
        store.put_raw("k", "{}").unwrap();
        assert_eq!(store.get_raw("k").unwrap().unwrap(), "{}");
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryStore::new();
        store.put_raw("k", "1").unwrap();
        store.put_raw("k", "2").unwrap();
        assert_eq!(store.get_raw("k").unwrap().unwrap(), "2");
        store.remove("k").unwrap();
        assert!(store.get_raw("k").unwrap().is_none());
    }

    #[test]
    fn mirror_swallows_write_failure() {
        // Pointing the store at a path that is a file makes every put fail.
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "not a dir").unwrap();
        let store = FileStore::new(blocker.join("sub"));
        // Must not panic or return an error.
        mirror(&store, "k", &serde_json::json!({"ok": true}));
    }

    #[test]
    fn key_formats() {
        let case = CaseId::new("abc");
        assert_eq!(case_key(&case), "case_abc");
        assert_eq!(agent_state_key(&case), "agent_state_abc");
        assert_eq!(rule_key(&RuleId::new("language_24m"), 24), "rule_language_24m_24");
    }
}
