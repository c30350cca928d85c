use crate::error::StateError;
use crate::fsutil::write_atomic;
use crate::types::TicketKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    processed: BTreeMap<String, bool>,
}

#[derive(Debug)]
pub struct ProcessedSet {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, bool>>,
}

impl ProcessedSet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory set with the file's content. A missing file
    /// leaves the set empty.
    pub fn load(&self) -> Result<(), StateError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file yet");
                return Ok(());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let file: StateFile =
            serde_json::from_slice(&data).map_err(|source| StateError::Parse {
                path: self.path.clone(),
                source,
            })?;
        let mut inner = self.lock()?;
        *inner = file.processed;
        debug!(path = %self.path.display(), count = inner.len(), "loaded processed set");
        Ok(())
    }

    pub fn is_processed(&self, key: &TicketKey) -> bool {
        self.lock()
            .map(|inner| inner.get(key.as_str()).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Records `key` and persists before returning. On persistence failure the
    /// in-memory set is left unchanged.
    pub fn mark_processed(&self, key: &TicketKey) -> Result<(), StateError> {
        let mut inner = self.lock()?;
        let previous = inner.insert(key.as_str().to_string(), true);
        if let Err(err) = self.persist(&inner) {
            match previous {
                Some(value) => inner.insert(key.as_str().to_string(), value),
                None => inner.remove(key.as_str()),
            };
            return Err(err);
        }
        Ok(())
    }

    /// Drops `key` from the ledger so a later cycle picks the ticket up again.
    /// Returns whether the key was present.
    pub fn forget(&self, key: &TicketKey) -> Result<bool, StateError> {
        let mut inner = self.lock()?;
        let Some(previous) = inner.remove(key.as_str()) else {
            return Ok(false);
        };
        if let Err(err) = self.persist(&inner) {
            inner.insert(key.as_str().to_string(), previous);
            return Err(err);
        }
        Ok(true)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock()
            .map(|inner| {
                inner
                    .iter()
                    .filter(|(_, done)| **done)
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn save(&self) -> Result<(), StateError> {
        let inner = self.lock()?;
        self.persist(&inner)
    }

    fn persist(&self, processed: &BTreeMap<String, bool>) -> Result<(), StateError> {
        let file = StateFile {
            processed: processed.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(StateError::Encode)?;
        write_atomic(&self.path, &bytes).map_err(|source| StateError::Persist {
            path: self.path.clone(),
            source,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, bool>>, StateError> {
        self.inner.lock().map_err(|_| StateError::Poisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> TicketKey {
        TicketKey::new(value).unwrap()
    }

    #[test]
    fn marks_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let set = ProcessedSet::new(&path);
        set.load().unwrap();
        assert!(!set.is_processed(&key("X")));
        set.mark_processed(&key("X")).unwrap();
        assert!(set.is_processed(&key("X")));

        let reloaded = ProcessedSet::new(&path);
        reloaded.load().unwrap();
        assert!(reloaded.is_processed(&key("X")));
        assert_eq!(reloaded.keys(), vec!["X".to_string()]);
    }

    #[test]
    fn file_format_is_a_processed_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"processed":{"A-1":true,"B-2":false}}"#).unwrap();
        let set = ProcessedSet::new(&path);
        set.load().unwrap();
        assert!(set.is_processed(&key("A-1")));
        assert!(!set.is_processed(&key("B-2")));

        set.mark_processed(&key("C-3")).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["processed"]["C-3"], serde_json::Value::Bool(true));
    }

    #[test]
    fn missing_file_is_empty_but_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ProcessedSet::new(dir.path().join("absent.json"));
        assert!(missing.load().is_ok());
        assert!(missing.keys().is_empty());

        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();
        let corrupt = ProcessedSet::new(&path);
        assert!(matches!(corrupt.load(), Err(StateError::Parse { .. })));
    }

    #[test]
    fn failed_persist_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        // The target is a non-empty directory, so the rename cannot succeed.
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();
        let set = ProcessedSet::new(&path);
        assert!(matches!(
            set.mark_processed(&key("X")),
            Err(StateError::Persist { .. })
        ));
        assert!(!set.is_processed(&key("X")));
    }

    #[test]
    fn forget_removes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let set = ProcessedSet::new(&path);
        set.mark_processed(&key("X")).unwrap();
        assert!(set.forget(&key("X")).unwrap());
        assert!(!set.forget(&key("X")).unwrap());

        let reloaded = ProcessedSet::new(&path);
        reloaded.load().unwrap();
        assert!(!reloaded.is_processed(&key("X")));
    }
}
