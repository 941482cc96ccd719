//! State store: durable per-dataset status fields shared by the scheduler
//! and the HTTP listing.
//!
//! Persists a JSON object `{ dataset: { field: value, … }, … }` at a
//! configurable path. Every mutation holds one lock across
//! merge → stamp → persist, and persistence goes through
//! [`datahub_core::persist::write_json_atomic`], so no reader ever observes
//! a half-written file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use datahub_core::{persist, timestamp, DatasetState, DatasetStatus};

/// Field map of one dataset entry.
pub type Fields = serde_json::Map<String, Value>;

type StateMap = BTreeMap<String, Fields>;

pub struct StateStore {
    path: PathBuf,
    state: Mutex<StateMap>,
}

impl StateStore {
    /// Open the store at `path`.
    ///
    /// A missing file starts empty; so does a malformed one (logged).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match persist::load_json_or_default::<StateMap>(&path) {
            Ok(state) => {
                tracing::info!(path = %path.display(), datasets = state.len(), "state store opened");
                state
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "state file unreadable, starting empty");
                StateMap::new()
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge `fields` into the entry for `dataset` (creating it), stamp
    /// `state_updated_at`, persist, and return a copy of the merged entry.
    pub fn update<I, K>(&self, dataset: &str, fields: I) -> Fields
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut state = self.state.lock();
        let entry = state.entry(dataset.to_owned()).or_default();
        let mut changed = Vec::new();
        for (key, value) in fields {
            let key = key.into();
            changed.push(key.clone());
            entry.insert(key, value);
        }
        entry.insert(
            "state_updated_at".to_owned(),
            Value::String(timestamp::now()),
        );
        let merged = entry.clone();
        self.persist_locked(&state);
        tracing::debug!(dataset, fields = ?changed, "state updated");
        merged
    }

    /// Copy of the entry for `dataset`; empty if unknown.
    pub fn get(&self, dataset: &str) -> Fields {
        self.state.lock().get(dataset).cloned().unwrap_or_default()
    }

    /// Copy of every entry.
    pub fn get_all(&self) -> BTreeMap<String, Fields> {
        self.state.lock().clone()
    }

    /// Typed view of one entry. `None` if absent or not representable.
    pub fn state(&self, dataset: &str) -> Option<DatasetState> {
        let fields = self.state.lock().get(dataset).cloned()?;
        match serde_json::from_value(Value::Object(fields)) {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::warn!(dataset, error = %err, "state entry does not match the expected shape");
                None
            }
        }
    }

    pub fn set_status(&self, dataset: &str, status: DatasetStatus) -> Fields {
        self.update(dataset, [("status", Value::from(status.as_str()))])
    }

    pub fn get_last_updated(&self, dataset: &str) -> Option<String> {
        self.state
            .lock()
            .get(dataset)
            .and_then(|f| f.get("last_updated"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// `true` once a snapshot was produced: status `ready` and `last_packaged_at` set.
    pub fn is_packaged(&self, dataset: &str) -> bool {
        let state = self.state.lock();
        let Some(fields) = state.get(dataset) else {
            return false;
        };
        fields.get("status").and_then(Value::as_str) == Some(DatasetStatus::Ready.as_str())
            && fields.contains_key("last_packaged_at")
    }

    pub fn delete(&self, dataset: &str) -> bool {
        let mut state = self.state.lock();
        if state.remove(dataset).is_none() {
            return false;
        }
        self.persist_locked(&state);
        tracing::info!(dataset, "state deleted");
        true
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.clear();
        self.persist_locked(&state);
        tracing::warn!("all dataset state cleared");
    }

    /// Memory stays authoritative when the write fails; the next successful
    /// mutation rewrites the whole document.
    fn persist_locked(&self, state: &StateMap) {
        if let Err(err) = persist::write_json_atomic(&self.path, state) {
            tracing::error!(path = %self.path.display(), error = %err, "failed to persist state");
        }
    }
}
