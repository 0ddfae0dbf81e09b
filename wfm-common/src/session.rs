//! Session-scoped key/value store
//!
//! Each web session owns a directory under the session root; every logical
//! key is one JSON file inside it. The store holds the parsed page-group
//! configuration, the table content map, and materialized table row sets
//! between requests. Consistency contract: a session has a single writer
//! (one interactive analyst); concurrent writers are not coordinated and
//! the last write wins.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Per-session key/value blob store backed by one JSON file per key
#[derive(Debug, Clone)]
pub struct SessionStore {
    session_id: String,
    dir: PathBuf,
}

impl SessionStore {
    /// Create a new session with a fresh id
    pub fn create(root: &Path) -> Result<Self> {
        Self::join(root, &Uuid::new_v4().simple().to_string())
    }

    /// Join an existing session, creating its directory as required
    pub fn join(root: &Path, session_id: &str) -> Result<Self> {
        if session_id.is_empty() || !session_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidInput(format!(
                "Invalid session id: {}",
                session_id
            )));
        }
        let dir = root.join(session_id);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            session_id: session_id.to_string(),
            dir,
        })
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Directory holding this session's files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// True when a value has been stored under `key`
    pub fn exists(&self, key: &str) -> bool {
        self.key_path(key).exists()
    }

    /// Serialize `value` under `key`, replacing any previous value
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)
            .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", key, e)))?;
        std::fs::write(self.key_path(key), data)?;
        Ok(())
    }

    /// Load the value stored under `key`, `None` when absent
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path)?;
        let value = serde_json::from_slice(&data)
            .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", key, e)))?;
        Ok(Some(value))
    }

    /// Remove the value stored under `key` if present
    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn save_load_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::create(root.path()).unwrap();

        let mut map = HashMap::new();
        map.insert("dep_set_id".to_string(), "D_1000001".to_string());
        store.save("table_content_1", &map).unwrap();

        assert!(store.exists("table_content_1"));
        let loaded: HashMap<String, String> = store.load("table_content_1").unwrap().unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn load_missing_key_is_none() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::create(root.path()).unwrap();
        let loaded: Option<Vec<String>> = store.load("missing").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn join_rejects_path_traversal() {
        let root = tempfile::tempdir().unwrap();
        assert!(SessionStore::join(root.path(), "../evil").is_err());
        assert!(SessionStore::join(root.path(), "").is_err());
    }

    #[test]
    fn join_existing_session_sees_prior_values() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::create(root.path()).unwrap();
        store.save("marker", &42u32).unwrap();

        let joined = SessionStore::join(root.path(), store.id()).unwrap();
        let value: u32 = joined.load("marker").unwrap().unwrap();
        assert_eq!(value, 42);
    }
}
