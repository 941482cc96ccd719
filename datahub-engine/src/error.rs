//! Error types for datahub-engine.

use std::path::PathBuf;

use thiserror::Error;

use datahub_core::PersistError;

/// All errors that can arise from checking, packaging, or persisting datasets.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The dataset source directory does not exist.
    #[error("source directory not found: {path}")]
    NotFound { path: PathBuf },

    /// The dataset source path exists but is not a directory.
    #[error("source path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure while writing a zip archive.
    #[error("archive error at {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// State file persistence failure.
    #[error("state persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Convenience constructor for [`EngineError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn archive_err(path: impl Into<PathBuf>, source: zip::result::ZipError) -> EngineError {
    EngineError::Archive {
        path: path.into(),
        source,
    }
}
