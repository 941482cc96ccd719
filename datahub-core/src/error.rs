//! Error types for datahub-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating hub / client configuration.
///
/// Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading the configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file did not exist.
    #[error("configuration not found at {path}")]
    NotFound { path: PathBuf },

    /// YAML parse error: includes file path and line context from serde_yaml.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The file parsed but violates a semantic rule (duplicate names, bad threshold, …).
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from the atomic JSON persistence layer.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted document exists but is not valid JSON for the expected shape.
    #[error("failed to parse JSON at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from loading a trade calendar file.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("calendar at {path} has no `交易日期` or `trade_date` column")]
    MissingColumn { path: PathBuf },
}

pub(crate) fn config_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn persist_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.into(),
        source,
    }
}
