use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the hub runtime: startup, scheduler, and HTTP server.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] datahub_core::ConfigError),

    #[error("calendar error: {0}")]
    Calendar(#[from] datahub_core::CalendarError),

    #[error("engine error: {0}")]
    Engine(#[from] datahub_engine::EngineError),

    #[error("task failure: {0}")]
    Task(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> HubError {
    HubError::Io {
        path: path.into(),
        source,
    }
}
