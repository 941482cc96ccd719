//! Breadth-first directory walks over live dataset trees.
//!
//! Two flavours: [`data_files`] tolerates unreadable entries (freshness
//! checks and the HTTP listing must never fail on one bad file), while
//! [`files_strict`] propagates every error (packaging must not silently drop
//! files from a snapshot).
//!
//! Symlinked directories are never descended into; symlinks to regular files
//! count as the file they point at.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{io_err, EngineError};

/// A regular file with the metadata freshness checks care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// Every regular file under `root` whose extension is in `extensions`
/// (case-insensitive, no dot). An empty filter accepts every file.
///
/// A missing `root` yields nothing. Unreadable directories and files whose
/// metadata cannot be read are logged and skipped.
pub fn data_files(root: &Path, extensions: &[String]) -> Vec<DataFile> {
    let mut out = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound || current != root {
                    tracing::warn!(path = %current.display(), error = %err, "cannot read directory");
                }
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => {
                    dirs.push(path);
                    continue;
                }
                Ok(kind) if kind.is_symlink() && path.is_dir() => continue,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot stat file");
                    continue;
                }
            }
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot stat file");
                    continue;
                }
            };
            if !meta.is_file() || !matches_extension(&path, extensions) {
                continue;
            }
            match meta.modified() {
                Ok(modified) => out.push(DataFile {
                    path,
                    modified,
                    size: meta.len(),
                }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot read mtime");
                }
            }
        }
    }
    out
}

/// Every regular file under `root`, sorted. Any I/O error aborts the walk.
pub fn files_strict(root: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = fs::read_dir(&current).map_err(|e| io_err(&current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let path = entry.path();
            let kind = entry.file_type().map_err(|e| io_err(&path, e))?;
            if kind.is_dir() {
                dirs.push(path);
            } else if kind.is_file() || (kind.is_symlink() && path.is_file()) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("top.csv"), "1").unwrap();
        fs::write(dir.path().join("a/mid.CSV"), "22").unwrap();
        fs::write(dir.path().join("a/b/deep.csv"), "333").unwrap();
        fs::write(dir.path().join("a/b/notes.txt"), "x").unwrap();
        dir
    }

    #[test]
    fn empty_filter_accepts_every_file() {
        let dir = tree();
        assert_eq!(data_files(dir.path(), &[]).len(), 4);
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let dir = tree();
        let files = data_files(dir.path(), &["csv".to_string()]);
        assert_eq!(files.len(), 3);
        let total: u64 = files.iter().map(|f| f.size).sum();
        assert_eq!(total, 6);

        let dotted = data_files(dir.path(), &[".txt".to_string()]);
        assert_eq!(dotted.len(), 1);
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(data_files(&dir.path().join("nope"), &[]).is_empty());
    }

    #[test]
    fn strict_walk_is_sorted_and_fails_on_missing_root() {
        let dir = tree();
        let files = files_strict(dir.path()).unwrap();
        assert_eq!(files.len(), 4);
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);

        assert!(files_strict(&dir.path().join("nope")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.csv"), "1").unwrap();
        std::os::unix::fs::symlink("..", dir.path().join("sub/up")).unwrap();
        std::os::unix::fs::symlink("a.csv", dir.path().join("sub/link.csv")).unwrap();

        let files = data_files(dir.path(), &["csv".to_string()]);
        let mut names: Vec<_> = files
            .iter()
            .map(|f| f.path.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![PathBuf::from("sub/a.csv"), PathBuf::from("sub/link.csv")]
        );

        let strict = files_strict(dir.path()).unwrap();
        assert_eq!(
            strict,
            vec![dir.path().join("sub/a.csv"), dir.path().join("sub/link.csv")]
        );
    }
}
