//! Atomic JSON persistence shared by the hub state file and the client
//! sync-state file.
//!
//! Write flow: serialize → `<path>.tmp` sibling → fsync → `rename`.
//! The temp file is always in the target's directory so the rename never
//! crosses filesystems; readers see either the old or the new document.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{persist_io_err, PersistError};

/// `<path>.tmp` next to the target.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Load a JSON document, returning `T::default()` when the file does not exist.
///
/// A file that exists but does not parse is `PersistError::Parse`.
pub fn load_json_or_default<T>(path: &Path) -> Result<T, PersistError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| persist_io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&contents).map_err(|e| PersistError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomically replace `path` with the pretty-printed JSON of `value`.
///
/// Parent directories are created as needed. On failure the `.tmp` sibling
/// is removed and the previous document is left untouched.
pub fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), PersistError>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| persist_io_err(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path_for(path);

    let result = write_and_rename(&tmp, path, &json);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let mut file = std::fs::File::create(tmp).map_err(|e| persist_io_err(tmp, e))?;
    file.write_all(bytes).map_err(|e| persist_io_err(tmp, e))?;
    file.sync_all().map_err(|e| persist_io_err(tmp, e))?;
    drop(file);
    std::fs::rename(tmp, path).map_err(|e| persist_io_err(path, e))
}
