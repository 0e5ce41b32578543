//! JSON file-backed persistence for the autoscaler's `StatStore` history.
//!
//! Mirrors an ordered `{timestamp -> Stat}` mapping to a single file on disk
//! (`memory.json`, the Rust-native stand-in for the source's `memory.pickle`)
//! so the rolling window survives a process restart when running non-prod.

#![forbid(unsafe_code)]

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An insertion-ordered `{key -> value}` mapping snapshotted to a single JSON
/// file on every [`JsonHistoryStore::save`] call.
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the ordered map from disk. A missing or corrupt file is treated
    /// as an empty store — logged, never fatal.
    pub fn load<K, V>(&self) -> IndexMap<K, V>
    where
        K: Eq + Hash + for<'de> Deserialize<'de>,
        V: for<'de> Deserialize<'de>,
    {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt stat history file, starting fresh");
                IndexMap::new()
            }),
            Err(_) => {
                debug!(path = %self.path.display(), "no stat history file, starting fresh");
                IndexMap::new()
            }
        }
    }

    /// Serialise the ordered map to disk, creating parent directories as needed.
    pub fn save<K, V>(&self, data: &IndexMap<K, V>) -> std::io::Result<()>
    where
        K: Serialize + Hash + Eq,
        V: Serialize,
    {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(data).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, content)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_insertion_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonHistoryStore::new(dir.path().join("memory.json"));

        let mut data: IndexMap<i64, String> = IndexMap::new();
        data.insert(300, "third-ish".to_string());
        data.insert(100, "first".to_string());
        data.insert(200, "second".to_string());
        store.save(&data).expect("save");

        let loaded: IndexMap<i64, String> = store.load();
        let keys: Vec<i64> = loaded.keys().copied().collect();
        assert_eq!(keys, vec![300, 100, 200]);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonHistoryStore::new(dir.path().join("nonexistent.json"));
        let loaded: IndexMap<i64, String> = store.load();
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "not json").expect("write");

        let store = JsonHistoryStore::new(&path);
        let loaded: IndexMap<i64, String> = store.load();
        assert!(loaded.is_empty());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a").join("b").join("memory.json");
        let store = JsonHistoryStore::new(&path);

        let mut data: IndexMap<i64, String> = IndexMap::new();
        data.insert(1, "v".to_string());
        store.save(&data).expect("save with nested dirs");

        let loaded: IndexMap<i64, String> = store.load();
        assert_eq!(loaded.get(&1).unwrap(), "v");
    }
}
