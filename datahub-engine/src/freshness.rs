//! Freshness checks over a dataset's live file tree.
//!
//! A file is fresh when its mtime is less than 24 hours old. The dataset's
//! watermark is the mtime at the 85th percentile of the ascending mtime list,
//! which ignores a small tail of straggling writes but still moves forward
//! once most of the tree has been rewritten.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::NaiveDate;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use datahub_core::{timestamp, DatasetConfig, FreshnessResult, FreshnessSummary, HubConfig};

use crate::walk::{self, DataFile};

const FRESH_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Percentile used for the watermark, in hundredths.
const WATERMARK_PERCENTILE: usize = 85;

/// Two samples within this ratio delta count as quiescent.
pub const STABILITY_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct FreshnessChecker {
    dataset: String,
    paths: Vec<PathBuf>,
    extensions: Vec<String>,
}

/// Per-file detail returned by [`FreshnessChecker::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct FileStat {
    pub path: PathBuf,
    pub mtime: String,
    pub size: u64,
    pub is_fresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FreshnessStats {
    pub trade_date: NaiveDate,
    pub dataset: String,
    pub summary: FreshnessSummary,
    pub files: Vec<FileStat>,
}

impl FreshnessChecker {
    pub fn new(dataset: impl Into<String>, paths: Vec<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            dataset: dataset.into(),
            paths,
            extensions,
        }
    }

    /// Checker over `data_root/dataset.path` with the configured extension filter.
    pub fn for_dataset(config: &HubConfig, dataset: &DatasetConfig) -> Self {
        Self::new(
            dataset.name.as_str(),
            vec![config.dataset_dir(dataset)],
            config.check.extensions.clone(),
        )
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Check against the wall clock.
    pub fn check(&self, trade_date: NaiveDate) -> FreshnessResult {
        self.check_at(trade_date, SystemTime::now())
    }

    /// Deterministic check: freshness is judged relative to `now`.
    ///
    /// `trade_date` anchors the check for logging; file selection is by mtime.
    pub fn check_at(&self, trade_date: NaiveDate, now: SystemTime) -> FreshnessResult {
        let files = self.collect();
        let result = summarize(&files, now);
        tracing::info!(
            dataset = %self.dataset,
            %trade_date,
            total = result.total_count(),
            fresh = result.fresh_count(),
            ratio = result.fresh_ratio(),
            last_updated = %result.last_updated(),
            "freshness checked"
        );
        result
    }

    /// Two-sample quiescence test.
    ///
    /// Samples once, waits `debounce_seconds` in one-second steps (returning
    /// `None` as soon as `cancel` fires), samples again, and returns the second
    /// sample iff the ratios differ by less than [`STABILITY_TOLERANCE`].
    ///
    /// Blocks the calling thread; run it on a blocking worker.
    pub fn check_stable(
        &self,
        trade_date: NaiveDate,
        debounce_seconds: u64,
        cancel: &CancellationToken,
    ) -> Option<FreshnessResult> {
        let first = self.check(trade_date);
        tracing::debug!(dataset = %self.dataset, debounce_seconds, "debounce wait");
        for _ in 0..debounce_seconds {
            if cancel.is_cancelled() {
                tracing::info!(dataset = %self.dataset, "debounce cancelled");
                return None;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
        if cancel.is_cancelled() {
            tracing::info!(dataset = %self.dataset, "debounce cancelled");
            return None;
        }
        let second = self.check(trade_date);
        let stable = stable_sample(&first, second);
        if stable.is_none() {
            tracing::warn!(dataset = %self.dataset, "dataset still changing, retrying next tick");
        }
        stable
    }

    /// Summary plus per-file detail, sorted by mtime.
    pub fn stats(&self, trade_date: NaiveDate) -> FreshnessStats {
        let now = SystemTime::now();
        let mut files = self.collect();
        files.sort_by_key(|f| f.modified);
        let summary = summarize(&files, now).summary();
        let files = files
            .into_iter()
            .map(|f| FileStat {
                is_fresh: is_fresh_at(f.modified, now),
                mtime: timestamp::format_system_time(f.modified),
                size: f.size,
                path: f.path,
            })
            .collect();
        FreshnessStats {
            trade_date,
            dataset: self.dataset.clone(),
            summary,
            files,
        }
    }

    fn collect(&self) -> Vec<DataFile> {
        let mut files = Vec::new();
        for path in &self.paths {
            if !path.exists() {
                tracing::warn!(dataset = %self.dataset, path = %path.display(), "dataset path does not exist");
                continue;
            }
            files.extend(walk::data_files(path, &self.extensions));
        }
        files
    }
}

/// `Some(second)` iff the two samples agree within [`STABILITY_TOLERANCE`].
pub fn stable_sample(first: &FreshnessResult, second: FreshnessResult) -> Option<FreshnessResult> {
    let delta = (second.fresh_ratio() - first.fresh_ratio()).abs();
    tracing::debug!(delta, "debounce delta");
    (delta < STABILITY_TOLERANCE).then_some(second)
}

fn summarize(files: &[DataFile], now: SystemTime) -> FreshnessResult {
    if files.is_empty() {
        return FreshnessResult::new(0, 0, timestamp::format_system_time(now));
    }
    let fresh = files.iter().filter(|f| is_fresh_at(f.modified, now)).count();
    let mut mtimes: Vec<SystemTime> = files.iter().map(|f| f.modified).collect();
    mtimes.sort_unstable();
    let watermark = mtimes[watermark_index(mtimes.len())];
    FreshnessResult::new(files.len(), fresh, timestamp::format_system_time(watermark))
}

/// `min(floor(n * 0.85), n - 1)`; `n` must be non-zero.
fn watermark_index(n: usize) -> usize {
    (n * WATERMARK_PERCENTILE / 100).min(n - 1)
}

/// Files stamped in the future count as fresh.
fn is_fresh_at(modified: SystemTime, now: SystemTime) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age < FRESH_WINDOW,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use rstest::rstest;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn write_with_age(dir: &TempDir, name: &str, age: Duration) -> SystemTime {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, name).unwrap();
        let mtime = SystemTime::now() - age;
        set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
        mtime
    }

    fn checker(dir: &TempDir) -> FreshnessChecker {
        FreshnessChecker::new("ds", vec![dir.path().to_path_buf()], vec![])
    }

    #[rstest]
    #[case(1, 0)]
    #[case(2, 1)]
    #[case(10, 8)]
    #[case(20, 17)]
    #[case(100, 85)]
    fn watermark_index_is_floor_of_85th_percentile(#[case] n: usize, #[case] idx: usize) {
        assert_eq!(watermark_index(n), idx);
    }

    #[test]
    fn ratio_counts_files_under_24h() {
        let dir = TempDir::new().unwrap();
        for i in 0..3 {
            write_with_age(&dir, &format!("fresh{i}.csv"), Duration::from_secs(60));
        }
        write_with_age(&dir, "old.csv", Duration::from_secs(48 * 3600));

        let r = checker(&dir).check(date());
        assert_eq!(r.total_count(), 4);
        assert_eq!(r.fresh_count(), 3);
        assert_eq!(r.fresh_ratio(), 0.75);
    }

    #[test]
    fn watermark_picks_85th_percentile_mtime() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let whole_secs = now
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let mut mtimes = Vec::new();
        for i in 0..10u64 {
            let name = format!("sub{}/f{i}.csv", i % 3);
            let path = dir.path().join(&name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "x").unwrap();
            let mtime = std::time::UNIX_EPOCH + Duration::from_secs(whole_secs - 1000 + i * 10);
            set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
            mtimes.push(mtime);
        }

        let r = checker(&dir).check_at(date(), now);
        // floor(10 * 0.85) = 8 -> ninth-oldest file
        assert_eq!(r.last_updated(), timestamp::format_system_time(mtimes[8]));
    }

    #[test]
    fn missing_paths_contribute_zero_files() {
        let dir = TempDir::new().unwrap();
        write_with_age(&dir, "a.csv", Duration::from_secs(10));
        let c = FreshnessChecker::new(
            "ds",
            vec![dir.path().join("missing"), dir.path().to_path_buf()],
            vec![],
        );
        assert_eq!(c.check(date()).total_count(), 1);
    }

    #[test]
    fn empty_dataset_watermark_is_now() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let r = checker(&dir).check_at(date(), now);
        assert_eq!(r.total_count(), 0);
        assert_eq!(r.fresh_ratio(), 0.0);
        assert_eq!(r.last_updated(), timestamp::format_system_time(now));
    }

    #[test]
    fn extension_filter_applies() {
        let dir = TempDir::new().unwrap();
        write_with_age(&dir, "a.csv", Duration::from_secs(10));
        write_with_age(&dir, "b.tmp", Duration::from_secs(10));
        let c = FreshnessChecker::new("ds", vec![dir.path().to_path_buf()], vec!["csv".into()]);
        assert_eq!(c.check(date()).total_count(), 1);
    }

    #[rstest]
    #[case(0.50, 0.505, true)]
    #[case(0.50, 0.495, true)]
    #[case(0.50, 0.51, false)]
    #[case(0.50, 0.49, false)]
    #[case(0.90, 0.70, false)]
    fn stability_is_symmetric(#[case] a: f64, #[case] b: f64, #[case] stable: bool) {
        let first = FreshnessResult::new(1000, (a * 1000.0).round() as usize, "w");
        let second = FreshnessResult::new(1000, (b * 1000.0).round() as usize, "w");
        assert_eq!(stable_sample(&first, second).is_some(), stable);
    }

    #[test]
    fn check_stable_without_wait_returns_second_sample() {
        let dir = TempDir::new().unwrap();
        write_with_age(&dir, "a.csv", Duration::from_secs(10));
        let token = CancellationToken::new();
        let r = checker(&dir).check_stable(date(), 0, &token).unwrap();
        assert_eq!(r.total_count(), 1);
    }

    #[test]
    fn cancelled_debounce_returns_none_promptly() {
        let dir = TempDir::new().unwrap();
        write_with_age(&dir, "a.csv", Duration::from_secs(10));
        let token = CancellationToken::new();
        token.cancel();

        let started = std::time::Instant::now();
        assert!(checker(&dir).check_stable(date(), 30, &token).is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stats_lists_files_sorted_by_mtime() {
        let dir = TempDir::new().unwrap();
        write_with_age(&dir, "new.csv", Duration::from_secs(10));
        write_with_age(&dir, "old.csv", Duration::from_secs(72 * 3600));

        let stats = checker(&dir).stats(date());
        assert_eq!(stats.summary.total_count, 2);
        assert_eq!(stats.files.len(), 2);
        assert!(stats.files[0].path.ends_with("old.csv"));
        assert!(!stats.files[0].is_fresh);
        assert!(stats.files[1].is_fresh);
    }
}
