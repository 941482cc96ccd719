//! Client-side record of the last remote watermark synced per dataset.
//!
//! Persisted as a flat `{ "<dataset>": "<watermark>" }` JSON object.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use datahub_core::persist;

use crate::error::ClientError;

#[derive(Debug)]
pub struct SyncState {
    path: PathBuf,
    records: BTreeMap<String, String>,
}

impl SyncState {
    /// Load the state file. A missing or malformed file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match persist::load_json_or_default(&path) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to load sync state, starting empty");
                BTreeMap::new()
            }
        };
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, dataset: &str) -> Option<&str> {
        self.records.get(dataset).map(String::as_str)
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.records.contains_key(dataset)
    }

    pub fn records(&self) -> &BTreeMap<String, String> {
        &self.records
    }

    /// Record `watermark` for `dataset` and persist.
    ///
    /// On a write failure the in-memory record is rolled back so memory and
    /// disk agree on what has been synced.
    pub fn set(&mut self, dataset: &str, watermark: &str) -> Result<(), ClientError> {
        let previous = self
            .records
            .insert(dataset.to_owned(), watermark.to_owned());
        if let Err(err) = persist::write_json_atomic(&self.path, &self.records) {
            match previous {
                Some(old) => self.records.insert(dataset.to_owned(), old),
                None => self.records.remove(dataset),
            };
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let state = SyncState::open(dir.path().join(".last_sync.json"));
        assert!(state.records().is_empty());
    }

    #[test]
    fn malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".last_sync.json");
        fs::write(&path, "{not json").unwrap();
        assert!(SyncState::open(&path).records().is_empty());
    }

    #[test]
    fn set_persists_flat_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/.last_sync.json");
        let mut state = SyncState::open(&path);
        state.set("stock", "2024-01-15T10:30:00.000000Z").unwrap();

        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            serde_json::json!({ "stock": "2024-01-15T10:30:00.000000Z" })
        );
        assert_eq!(
            SyncState::open(&path).get("stock"),
            Some("2024-01-15T10:30:00.000000Z")
        );
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let mut state = SyncState::open(blocker.join(".last_sync.json"));
        assert!(state.set("stock", "w").is_err());
        assert!(!state.contains("stock"));
    }
}
