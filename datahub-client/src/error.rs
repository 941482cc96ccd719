use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport failure or a non-2xx answer from the hub.
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("sync state error: {0}")]
    Persist(#[from] datahub_core::PersistError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ClientError {
    ClientError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn http_err(url: &str, err: ureq::Error) -> ClientError {
    let reason = match err {
        ureq::Error::Status(code, response) => {
            format!("HTTP {code} {}", response.status_text())
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    };
    ClientError::Http {
        url: url.to_owned(),
        reason,
    }
}
