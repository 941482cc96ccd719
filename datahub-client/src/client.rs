use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use datahub_core::{timestamp, ClientConfig, DatasetList, DatasetListing};

use crate::error::{http_err, io_err, ClientError};
use crate::state::SyncState;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    UpToDate,
    NotFound,
    ConfigError,
    DownloadFailed,
    ExtractFailed,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::UpToDate => "up_to_date",
            SyncStatus::NotFound => "not_found",
            SyncStatus::ConfigError => "config_error",
            SyncStatus::DownloadFailed => "download_failed",
            SyncStatus::ExtractFailed => "extract_failed",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of syncing one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub dataset: String,
    pub success: bool,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub timestamp: String,
}

impl SyncResult {
    fn ok(dataset: &str, status: SyncStatus) -> Self {
        Self {
            dataset: dataset.to_owned(),
            success: true,
            status,
            error: None,
            timestamp: timestamp::now(),
        }
    }

    fn failed(dataset: &str, status: SyncStatus, error: impl ToString) -> Self {
        Self {
            dataset: dataset.to_owned(),
            success: false,
            status,
            error: Some(error.to_string()),
            timestamp: timestamp::now(),
        }
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{}: {} - {}", self.dataset, self.status, error),
            None => write!(f, "{}: {}", self.dataset, self.status),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Pulls snapshots newer than the local record from a hub.
pub struct SyncClient {
    config: ClientConfig,
    state: SyncState,
    agent: ureq::Agent,
}

impl SyncClient {
    pub fn new(config: ClientConfig, state_path: impl Into<PathBuf>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.hub.timeout))
            .build();
        Self {
            state: SyncState::open(state_path),
            config,
            agent,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// `GET /api/datasets`.
    pub fn fetch_datasets(&self) -> Result<Vec<DatasetListing>, ClientError> {
        let url = format!("{}/api/datasets", self.config.base_url());
        let response = self.agent.get(&url).call().map_err(|e| http_err(&url, e))?;
        let list: DatasetList = response
            .into_json()
            .map_err(|source| ClientError::Decode { url, source })?;
        Ok(list.datasets)
    }

    /// A dataset needs sync when its package is ready and the remote
    /// watermark is strictly newer than the local record (or there is none).
    pub fn needs_sync(&self, remote: &DatasetListing) -> bool {
        if !remote.package_ready {
            tracing::info!(dataset = %remote.name, "package not ready");
            return false;
        }
        let Some(local) = self.state.get(&remote.name) else {
            tracing::info!(dataset = %remote.name, "no local record, sync needed");
            return true;
        };
        match remote.last_updated.as_deref() {
            Some(remote_wm) if remote_wm > local => {
                tracing::info!(dataset = %remote.name, local, remote = remote_wm, "remote is newer");
                true
            }
            _ => {
                tracing::info!(dataset = %remote.name, local, "up to date");
                false
            }
        }
    }

    /// Configured datasets whose remote entry needs sync. Downloads nothing.
    pub fn check_updates(&self) -> Result<Vec<DatasetListing>, ClientError> {
        let remote = self.fetch_datasets()?;
        Ok(remote
            .into_iter()
            .filter(|r| self.config.dataset(&r.name).is_some())
            .filter(|r| self.needs_sync(r))
            .collect())
    }

    pub fn sync_dataset(&mut self, name: &str) -> SyncResult {
        tracing::info!(dataset = name, "starting sync");
        let remote = match self.fetch_datasets() {
            Ok(list) => list.into_iter().find(|r| r.name == name),
            Err(err) => {
                tracing::error!(dataset = name, error = %err, "failed to fetch datasets");
                return SyncResult::failed(name, SyncStatus::Error, err);
            }
        };
        let Some(remote) = remote else {
            return SyncResult::failed(
                name,
                SyncStatus::NotFound,
                format!("dataset {name} not found on server"),
            );
        };
        self.sync_remote(&remote)
    }

    /// Sync every configured dataset; failures are reported per dataset.
    pub fn sync_all(&mut self) -> Vec<SyncResult> {
        let remote = match self.fetch_datasets() {
            Ok(remote) => remote,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch datasets");
                return self
                    .config
                    .datasets
                    .iter()
                    .map(|ds| SyncResult::failed(ds.name.as_str(), SyncStatus::Error, &err))
                    .collect();
            }
        };
        let names: Vec<String> = self
            .config
            .datasets
            .iter()
            .map(|ds| ds.name.as_str().to_owned())
            .collect();
        names
            .iter()
            .map(|name| match remote.iter().find(|r| &r.name == name) {
                Some(entry) => self.sync_remote(entry),
                None => SyncResult::failed(
                    name,
                    SyncStatus::NotFound,
                    format!("dataset {name} not found on server"),
                ),
            })
            .collect()
    }

    fn sync_remote(&mut self, remote: &DatasetListing) -> SyncResult {
        let name = remote.name.as_str();

        if !self.needs_sync(remote) {
            if let Some(watermark) = remote.last_updated.as_deref() {
                if self.state.contains(name) {
                    if let Err(err) = self.state.set(name, watermark) {
                        return SyncResult::failed(name, SyncStatus::Error, err);
                    }
                }
            }
            return SyncResult::ok(name, SyncStatus::UpToDate);
        }

        let Some(local_dir) = self.config.dataset(name).map(|ds| ds.local_dir.clone()) else {
            return SyncResult::failed(
                name,
                SyncStatus::ConfigError,
                format!("dataset {name} not found in config"),
            );
        };

        let download = match self.download_package(name) {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(dataset = name, error = %err, "download failed");
                return SyncResult::failed(name, SyncStatus::DownloadFailed, err);
            }
        };

        match extract_package(download.path(), &local_dir) {
            Ok(entries) => {
                tracing::info!(dataset = name, entries, dir = %local_dir.display(), "extracted package");
            }
            Err(err) => {
                tracing::error!(dataset = name, error = %err, "extraction failed");
                return SyncResult::failed(name, SyncStatus::ExtractFailed, err);
            }
        }

        if let Some(watermark) = remote.last_updated.as_deref() {
            if let Err(err) = self.state.set(name, watermark) {
                return SyncResult::failed(name, SyncStatus::Error, err);
            }
        }
        if let Err(err) = download.close() {
            tracing::debug!(dataset = name, error = %err, "failed to remove temporary download");
        }

        tracing::info!(dataset = name, "sync complete");
        SyncResult::ok(name, SyncStatus::Success)
    }

    /// Stream `/package/{name}.zip` into a temp file under the configured
    /// temp directory.
    fn download_package(&self, name: &str) -> Result<tempfile::NamedTempFile, ClientError> {
        let temp_dir = self.config.temp_dir();
        std::fs::create_dir_all(&temp_dir).map_err(|e| io_err(&temp_dir, e))?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{name}_"))
            .suffix(".zip")
            .tempfile_in(&temp_dir)
            .map_err(|e| io_err(&temp_dir, e))?;

        let url = format!("{}/package/{name}.zip", self.config.base_url());
        tracing::info!(%url, dest = %file.path().display(), "downloading package");
        let response = self.agent.get(&url).call().map_err(|e| http_err(&url, e))?;
        if response.status() != 200 {
            return Err(ClientError::Http {
                reason: format!("unexpected HTTP {}", response.status()),
                url,
            });
        }
        let bytes = io::copy(&mut response.into_reader(), file.as_file_mut())
            .map_err(|e| io_err(file.path(), e))?;
        tracing::info!(bytes, "download finished");
        Ok(file)
    }
}

/// Extract `archive` into `target`, creating it as needed. Returns the
/// number of archive entries.
pub fn extract_package(archive: &Path, target: &Path) -> Result<usize, ClientError> {
    std::fs::create_dir_all(target).map_err(|e| io_err(target, e))?;
    let file = File::open(archive).map_err(|e| io_err(archive, e))?;
    let archive_err = |source| ClientError::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let mut zip = zip::ZipArchive::new(file).map_err(archive_err)?;
    let entries = zip.len();
    zip.extract(target).map_err(archive_err)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    use rstest::rstest;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn client(dir: &Path) -> SyncClient {
        let yaml = format!(
            "hub:\n  url: http://127.0.0.1:9/\ndatasets:\n  - name: stock\n    local_dir: {}\ntemp_dir: {}\n",
            dir.join("local").display(),
            dir.join("tmp").display()
        );
        let config = ClientConfig::from_yaml_str(&yaml, Path::new("inline.yaml")).unwrap();
        SyncClient::new(config, dir.join(".last_sync.json"))
    }

    fn listing(ready: bool, last_updated: Option<&str>) -> DatasetListing {
        DatasetListing {
            name: "stock".into(),
            last_updated: last_updated.map(str::to_owned),
            file_count: 1,
            total_size: 1,
            package_ready: ready,
            package_size: 1,
            freshness: serde_json::json!({}),
            status: "ready".into(),
        }
    }

    const LOCAL: &str = "2024-01-15T10:30:00.000000Z";

    #[rstest]
    #[case::not_ready(false, Some("2024-01-16T00:00:00.000000Z"), Some(LOCAL), false)]
    #[case::no_local_record(true, Some(LOCAL), None, true)]
    #[case::remote_newer(true, Some("2024-01-15T10:30:00.000001Z"), Some(LOCAL), true)]
    #[case::same_watermark(true, Some(LOCAL), Some(LOCAL), false)]
    #[case::remote_older(true, Some("2024-01-14T00:00:00.000000Z"), Some(LOCAL), false)]
    #[case::null_remote(true, None, Some(LOCAL), false)]
    fn needs_sync_decision(
        #[case] ready: bool,
        #[case] remote: Option<&str>,
        #[case] local: Option<&str>,
        #[case] expected: bool,
    ) {
        let dir = TempDir::new().unwrap();
        let mut client = client(dir.path());
        if let Some(local) = local {
            client.state.set("stock", local).unwrap();
        }
        assert_eq!(client.needs_sync(&listing(ready, remote)), expected);
    }

    #[test]
    fn up_to_date_refreshes_existing_record_without_download() {
        let dir = TempDir::new().unwrap();
        let mut client = client(dir.path());
        client.state.set("stock", LOCAL).unwrap();

        let result = client.sync_remote(&listing(true, Some(LOCAL)));
        assert!(result.success);
        assert_eq!(result.status, SyncStatus::UpToDate);
        assert_eq!(client.state().get("stock"), Some(LOCAL));
        assert!(!dir.path().join("tmp").exists());
    }

    #[test]
    fn unready_package_does_not_create_a_record() {
        let dir = TempDir::new().unwrap();
        let mut client = client(dir.path());
        let result = client.sync_remote(&listing(false, Some(LOCAL)));
        assert_eq!(result.status, SyncStatus::UpToDate);
        assert!(!client.state().contains("stock"));
    }

    #[test]
    fn unconfigured_dataset_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut client = client(dir.path());
        let mut remote = listing(true, Some(LOCAL));
        remote.name = "other".into();
        let result = client.sync_remote(&remote);
        assert!(!result.success);
        assert_eq!(result.status, SyncStatus::ConfigError);
    }

    #[test]
    fn unreachable_download_keeps_local_record() {
        let dir = TempDir::new().unwrap();
        let mut client = client(dir.path());
        client.state.set("stock", LOCAL).unwrap();

        let result = client.sync_remote(&listing(true, Some("2024-02-01T00:00:00.000000Z")));
        assert!(!result.success);
        assert_eq!(result.status, SyncStatus::DownloadFailed);
        assert_eq!(client.state().get("stock"), Some(LOCAL));
        assert_eq!(fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn unreachable_hub_fails_every_dataset_without_touching_state() {
        let dir = TempDir::new().unwrap();
        let mut client = client(dir.path());
        let results = client.sync_all();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, SyncStatus::Error);
        assert!(results[0].error.is_some());
        assert!(client.state().records().is_empty());
    }

    #[test]
    fn extracts_nested_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            zip.start_file("sh/600000.csv", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"price\n1\n").unwrap();
            zip.start_file("top.csv", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"price\n2\n").unwrap();
            zip.finish().unwrap();
        }

        let target = dir.path().join("out");
        assert_eq!(extract_package(&archive, &target).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(target.join("sh/600000.csv")).unwrap(),
            "price\n1\n"
        );
        assert!(target.join("top.csv").is_file());
    }

    #[test]
    fn invalid_archive_is_an_archive_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bad.zip");
        fs::write(&archive, b"not a zip").unwrap();
        let err = extract_package(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ClientError::Archive { .. }), "{err}");
    }

    #[test]
    fn result_display() {
        let ok = SyncResult::ok("stock", SyncStatus::Success);
        assert_eq!(ok.to_string(), "stock: success");
        let failed = SyncResult::failed("stock", SyncStatus::DownloadFailed, "HTTP 404");
        assert_eq!(failed.to_string(), "stock: download_failed - HTTP 404");
        assert_eq!(
            serde_json::to_value(&failed).unwrap()["status"],
            "download_failed"
        );
    }
}
