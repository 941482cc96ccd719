//! Hub and client YAML configuration.
//!
//! # API pattern
//!
//! - `load_*_at(path)` reads, parses, and validates a file.
//! - `*::from_yaml_str` parses and validates an in-memory document (tests).
//!
//! Every error is fatal at startup; nothing here is retried.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{config_io_err, ConfigError};
use crate::types::{is_safe_name, DatasetName, DEFAULT_FRESHNESS_THRESHOLD};

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// One watched dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: DatasetName,
    /// Relative to `server.data_root` (absolute paths are used as-is).
    pub path: PathBuf,
    #[serde(default = "default_threshold")]
    pub freshness_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_root: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            data_root: PathBuf::from("."),
            cache_dir: PathBuf::from(".cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub interval_minutes: u64,
    pub debounce_seconds: u64,
    /// Data-file extensions without the dot; empty means every regular file.
    pub extensions: Vec<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            debounce_seconds: 30,
            extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagingConfig {
    pub keep_versions: usize,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self { keep_versions: 5 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// CSV trade calendar; absent means Monday–Friday.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

/// Root of the hub YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub packaging: PackagingConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HubConfig {
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: HubConfig = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasets.is_empty() {
            return Err(ConfigError::Invalid("no datasets configured".into()));
        }
        let mut seen = HashSet::new();
        for ds in &self.datasets {
            if !is_safe_name(ds.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "dataset name {:?} is empty or contains a path separator or `..`",
                    ds.name.as_str()
                )));
            }
            if !seen.insert(ds.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate dataset name {:?}",
                    ds.name.as_str()
                )));
            }
            if !(0.0..=1.0).contains(&ds.freshness_threshold) {
                return Err(ConfigError::Invalid(format!(
                    "dataset {}: freshness_threshold {} is outside [0, 1]",
                    ds.name, ds.freshness_threshold
                )));
            }
        }
        if self.check.interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "check.interval_minutes must be at least 1".into(),
            ));
        }
        if self.packaging.keep_versions == 0 {
            return Err(ConfigError::Invalid(
                "packaging.keep_versions must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name.as_str() == name)
    }

    /// Live data directory of a dataset.
    pub fn dataset_dir(&self, dataset: &DatasetConfig) -> PathBuf {
        self.server.data_root.join(&dataset.path)
    }
}

/// Read, parse, and validate the hub configuration at `path`.
pub fn load_hub_config_at(path: &Path) -> Result<HubConfig, ConfigError> {
    let contents = read_config(path)?;
    HubConfig::from_yaml_str(&contents, path)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEndpoint {
    pub url: String,
    /// Seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDatasetConfig {
    pub name: DatasetName,
    pub local_dir: PathBuf,
}

/// Root of the client YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub hub: HubEndpoint,
    pub datasets: Vec<ClientDatasetConfig>,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.url.trim().is_empty() {
            return Err(ConfigError::Invalid("hub.url is empty".into()));
        }
        let mut seen = HashSet::new();
        for ds in &self.datasets {
            if !is_safe_name(ds.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "dataset name {:?} is empty or contains a path separator or `..`",
                    ds.name.as_str()
                )));
            }
            if !seen.insert(ds.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate dataset name {:?}",
                    ds.name.as_str()
                )));
            }
        }
        Ok(())
    }

    pub fn dataset(&self, name: &str) -> Option<&ClientDatasetConfig> {
        self.datasets.iter().find(|d| d.name.as_str() == name)
    }

    /// Hub URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.hub.url.trim_end_matches('/')
    }

    /// Directory for in-flight downloads: `temp_dir`, else `<cache dir>/datahub-sync`.
    pub fn temp_dir(&self) -> PathBuf {
        match &self.temp_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("datahub-sync"),
        }
    }
}

/// Read, parse, and validate the client configuration at `path`.
pub fn load_client_config_at(path: &Path) -> Result<ClientConfig, ConfigError> {
    let contents = read_config(path)?;
    ClientConfig::from_yaml_str(&contents, path)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_config(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|e| config_io_err(path, e))
}

fn default_threshold() -> f64 {
    DEFAULT_FRESHNESS_THRESHOLD
}

fn default_timeout() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
