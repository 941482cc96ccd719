//! Snapshot packager.
//!
//! ## `package`: write protocol
//!
//! 1. Validate the source directory (exists, is a directory).
//! 2. Pick `{name}_{YYYYMMDD_HHMMSS}.zip`; append `_{n}` on collision.
//! 3. Walk the source tree and deflate every file into `<final>.partial`,
//!    keyed by its `/`-separated path relative to the source root.
//! 4. fsync, then rename the partial over the final name.
//! 5. Enforce retention: keep the newest `keep_versions` snapshots.
//!
//! A failure in 3–4 removes the partial file; nothing else is rolled back.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use datahub_core::timestamp;

use crate::error::{archive_err, io_err, EngineError};
use crate::walk;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of [`Packager::package`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageOutcome {
    pub success: bool,
    pub path: Option<PathBuf>,
    pub file_count: usize,
    pub size: u64,
    pub error: Option<String>,
}

/// A successfully written snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packaged {
    pub path: PathBuf,
    pub file_count: usize,
    pub size: u64,
}

impl From<Result<Packaged, EngineError>> for PackageOutcome {
    fn from(result: Result<Packaged, EngineError>) -> Self {
        match result {
            Ok(p) => PackageOutcome {
                success: true,
                path: Some(p.path),
                file_count: p.file_count,
                size: p.size,
                error: None,
            },
            Err(err) => PackageOutcome {
                success: false,
                path: None,
                file_count: 0,
                size: 0,
                error: Some(err.to_string()),
            },
        }
    }
}

/// One snapshot on disk, as listed by [`Packager::list_versions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    /// File mtime, RFC 3339.
    pub created: String,
}

#[derive(Debug, Clone)]
struct Snapshot {
    path: PathBuf,
    filename: String,
    size: u64,
    modified: SystemTime,
    stamp: String,
    counter: u32,
}

// ---------------------------------------------------------------------------
// Packager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Packager {
    cache_dir: PathBuf,
    keep_versions: usize,
}

impl Packager {
    pub fn new(cache_dir: impl Into<PathBuf>, keep_versions: usize) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            keep_versions: keep_versions.max(1),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Package `source` as a new snapshot of `name`, reporting failure as a value.
    pub fn package(&self, name: &str, source: &Path) -> PackageOutcome {
        let result = self.try_package(name, source);
        if let Err(err) = &result {
            tracing::error!(dataset = name, source = %source.display(), error = %err, "packaging failed");
        }
        result.into()
    }

    /// `Result` form of [`package`](Self::package).
    pub fn try_package(&self, name: &str, source: &Path) -> Result<Packaged, EngineError> {
        let meta = match fs::metadata(source) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound {
                    path: source.to_path_buf(),
                })
            }
            Err(err) => return Err(io_err(source, err)),
        };
        if !meta.is_dir() {
            return Err(EngineError::NotADirectory {
                path: source.to_path_buf(),
            });
        }

        fs::create_dir_all(&self.cache_dir).map_err(|e| io_err(&self.cache_dir, e))?;
        let target = self.next_snapshot_path(name);
        tracing::info!(dataset = name, target = %target.display(), "packaging started");

        let files = walk::files_strict(source)?;
        let file_count = write_archive(source, &files, &target)?;
        let size = fs::metadata(&target).map_err(|e| io_err(&target, e))?.len();
        tracing::info!(dataset = name, files = file_count, size, "packaging completed");

        self.cleanup_old_versions(name);
        Ok(Packaged {
            path: target,
            file_count,
            size,
        })
    }

    /// Newest snapshot of `name`, if any.
    pub fn get_latest_package(&self, name: &str) -> Option<PathBuf> {
        self.snapshots(name).into_iter().next().map(|s| s.path)
    }

    /// All snapshots of `name`, newest first.
    pub fn list_versions(&self, name: &str) -> Vec<SnapshotInfo> {
        self.snapshots(name)
            .into_iter()
            .map(|s| SnapshotInfo {
                created: timestamp::format_system_time(s.modified),
                path: s.path,
                filename: s.filename,
                size: s.size,
            })
            .collect()
    }

    /// Best-effort delete; `false` if the file was absent or could not be removed.
    pub fn delete_package(&self, path: &Path) -> bool {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "package not found");
            return false;
        }
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "package deleted");
                true
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to delete package");
                false
            }
        }
    }

    /// Delete every snapshot of `name` beyond `keep_versions`. Returns the
    /// number removed.
    pub fn cleanup_old_versions(&self, name: &str) -> usize {
        let snapshots = self.snapshots(name);
        let mut deleted = 0;
        for old in snapshots.iter().skip(self.keep_versions) {
            match fs::remove_file(&old.path) {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!(dataset = name, file = %old.filename, "old snapshot deleted");
                }
                Err(err) => {
                    tracing::warn!(dataset = name, file = %old.filename, error = %err, "failed to delete old snapshot");
                }
            }
        }
        deleted
    }

    fn next_snapshot_path(&self, name: &str) -> PathBuf {
        let stamp = Utc::now().format(STAMP_FORMAT).to_string();
        let mut candidate = self.cache_dir.join(format!("{name}_{stamp}.zip"));
        let mut counter = 1u32;
        while candidate.exists() || partial_path(&candidate).exists() {
            candidate = self.cache_dir.join(format!("{name}_{stamp}_{counter}.zip"));
            counter += 1;
        }
        candidate
    }

    /// Snapshots of `name`, newest first (mtime, then stamp, then counter).
    fn snapshots(&self, name: &str) -> Vec<Snapshot> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut snapshots: Vec<Snapshot> = entries
            .flatten()
            .filter_map(|entry| {
                let filename = entry.file_name().to_string_lossy().into_owned();
                let (stamp, counter) = parse_snapshot_name(name, &filename)?;
                let meta = entry.metadata().ok().filter(|m| m.is_file())?;
                Some(Snapshot {
                    path: entry.path(),
                    size: meta.len(),
                    modified: meta.modified().ok()?,
                    stamp: stamp.to_owned(),
                    counter,
                    filename,
                })
            })
            .collect();
        snapshots.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.stamp.cmp(&a.stamp))
                .then_with(|| b.counter.cmp(&a.counter))
        });
        snapshots
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `{name}_{YYYYMMDD_HHMMSS}[_{n}].zip`, returning `(stamp, n)`.
///
/// Strict, so dataset `a` never claims snapshots of dataset `a_b`.
pub fn parse_snapshot_name<'a>(name: &str, filename: &'a str) -> Option<(&'a str, u32)> {
    let rest = filename
        .strip_prefix(name)?
        .strip_prefix('_')?
        .strip_suffix(".zip")?;
    if rest.len() < STAMP_LEN || !rest.is_char_boundary(STAMP_LEN) {
        return None;
    }
    let (stamp, tail) = rest.split_at(STAMP_LEN);
    let valid_stamp = stamp.char_indices().all(|(i, c)| {
        if i == 8 {
            c == '_'
        } else {
            c.is_ascii_digit()
        }
    });
    if !valid_stamp {
        return None;
    }
    let counter = match tail {
        "" => 0,
        _ => {
            let digits = tail.strip_prefix('_')?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()?
        }
    };
    Some((stamp, counter))
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

/// Entry name for `file` inside the archive: relative to `root`, `/`-separated.
fn entry_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write `files` into `<target>.partial` and rename it to `target`.
///
/// On any failure the partial archive is removed.
fn write_archive(root: &Path, files: &[PathBuf], target: &Path) -> Result<usize, EngineError> {
    let partial = partial_path(target);
    let result = write_partial(root, files, &partial)
        .and_then(|count| {
            fs::rename(&partial, target)
                .map(|()| count)
                .map_err(|e| io_err(target, e))
        });
    if result.is_err() && partial.exists() {
        if let Err(err) = fs::remove_file(&partial) {
            tracing::warn!(path = %partial.display(), error = %err, "failed to remove partial archive");
        }
    }
    result
}

fn write_partial(root: &Path, files: &[PathBuf], partial: &Path) -> Result<usize, EngineError> {
    let out = File::create(partial).map_err(|e| io_err(partial, e))?;
    let mut zip = ZipWriter::new(out);

    for file in files {
        let mut input = File::open(file).map_err(|e| io_err(file, e))?;
        let len = input.metadata().map_err(|e| io_err(file, e))?.len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(len >= u64::from(u32::MAX));
        let name = entry_name(root, file);
        zip.start_file(name.as_str(), options)
            .map_err(|e| archive_err(partial, e))?;
        io::copy(&mut input, &mut zip).map_err(|e| io_err(file, e))?;
        tracing::trace!(entry = %name, "added to archive");
    }

    let out = zip.finish().map_err(|e| archive_err(partial, e))?;
    out.sync_all().map_err(|e| io_err(partial, e))?;
    Ok(files.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use rstest::rstest;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("level1/level2")).unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::write(dir.path().join("level1/level1.txt"), "one").unwrap();
        fs::write(dir.path().join("level1/level2/level2.txt"), "two").unwrap();
        dir
    }

    #[rstest]
    #[case("a", "a_20240115_103000.zip", Some(("20240115_103000", 0)))]
    #[case("a", "a_20240115_103000_3.zip", Some(("20240115_103000", 3)))]
    #[case("a", "a_b_20240115_103000.zip", None)]
    #[case("a_b", "a_b_20240115_103000.zip", Some(("20240115_103000", 0)))]
    #[case("a", "a_20240115-103000.zip", None)]
    #[case("a", "a_20240115_103000_.zip", None)]
    #[case("a", "a_20240115_103000.zip.partial", None)]
    #[case("a", "b_20240115_103000.zip", None)]
    fn snapshot_names_parse_strictly(
        #[case] name: &str,
        #[case] filename: &str,
        #[case] expected: Option<(&str, u32)>,
    ) {
        assert_eq!(parse_snapshot_name(name, filename), expected);
    }

    #[test]
    fn entries_keep_relative_paths() {
        let src = fixture();
        let cache = TempDir::new().unwrap();
        let packager = Packager::new(cache.path(), 5);

        let packaged = packager.try_package("ds", src.path()).unwrap();
        assert_eq!(packaged.file_count, 3);
        assert!(packaged.size > 0);

        let mut archive = zip::ZipArchive::new(File::open(&packaged.path).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
        let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["level1/level1.txt", "level1/level2/level2.txt", "root.txt"]
        );
        let mut content = String::new();
        io::Read::read_to_string(&mut archive.by_name("level1/level2/level2.txt").unwrap(), &mut content)
            .unwrap();
        assert_eq!(content, "two");
    }

    #[test]
    fn missing_and_non_directory_sources_fail() {
        let cache = TempDir::new().unwrap();
        let packager = Packager::new(cache.path(), 5);

        let missing = packager.package("ds", &cache.path().join("nope"));
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("not found"));

        let file = cache.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let err = packager.try_package("ds", &file).unwrap_err();
        assert!(matches!(err, EngineError::NotADirectory { .. }));
    }

    #[test]
    fn same_second_packagings_do_not_collide() {
        let src = fixture();
        let cache = TempDir::new().unwrap();
        let packager = Packager::new(cache.path(), 10);

        let first = packager.try_package("ds", src.path()).unwrap();
        let second = packager.try_package("ds", src.path()).unwrap();
        assert_ne!(first.path, second.path);
        assert!(first.path.exists() && second.path.exists());
        assert_eq!(packager.list_versions("ds").len(), 2);
    }

    #[test]
    fn retention_keeps_newest() {
        let src = fixture();
        let cache = TempDir::new().unwrap();
        let keep = 2;
        let packager = Packager::new(cache.path(), keep);

        let base = SystemTime::now() - Duration::from_secs(3600);
        let mut created = Vec::new();
        for i in 0..=keep as u64 {
            let p = packager.try_package("ds", src.path()).unwrap().path;
            set_file_mtime(&p, FileTime::from_system_time(base + Duration::from_secs(i * 60))).unwrap();
            created.push(p);
        }
        assert_eq!(packager.cleanup_old_versions("ds"), 0);

        let remaining: Vec<PathBuf> = packager
            .list_versions("ds")
            .into_iter()
            .map(|v| v.path)
            .collect();
        assert_eq!(remaining.len(), keep);
        assert_eq!(remaining[0], created[keep]);
        assert_eq!(remaining[1], created[keep - 1]);
        assert!(!created[0].exists());
        assert_eq!(packager.get_latest_package("ds"), Some(created[keep].clone()));
    }

    #[test]
    fn other_datasets_are_not_touched_by_retention() {
        let src = fixture();
        let cache = TempDir::new().unwrap();
        let packager = Packager::new(cache.path(), 1);

        packager.try_package("a_b", src.path()).unwrap();
        packager.try_package("a", src.path()).unwrap();
        packager.try_package("a", src.path()).unwrap();

        assert_eq!(packager.list_versions("a").len(), 1);
        assert_eq!(packager.list_versions("a_b").len(), 1);
    }

    #[test]
    fn failed_write_leaves_no_partial() {
        let src = fixture();
        let cache = TempDir::new().unwrap();
        let target = cache.path().join("ds_20240101_000000.zip");
        let files = vec![
            src.path().join("root.txt"),
            src.path().join("vanished.txt"),
        ];

        let err = write_archive(src.path(), &files, &target).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
        assert_eq!(fs::read_dir(cache.path()).unwrap().count(), 0);
    }

    #[test]
    fn delete_package_is_best_effort() {
        let src = fixture();
        let cache = TempDir::new().unwrap();
        let packager = Packager::new(cache.path(), 5);
        let p = packager.try_package("ds", src.path()).unwrap().path;

        assert!(packager.delete_package(&p));
        assert!(!packager.delete_package(&p));
        assert!(packager.get_latest_package("ds").is_none());
    }
}
