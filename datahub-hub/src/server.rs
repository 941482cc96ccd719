//! HTTP distribution endpoint.
//!
//! ```text
//! GET /health              -> 200 {"status":"ok"}
//! GET /api/datasets        -> 200 {"datasets":[…]}
//! GET /package/{name}.zip  -> 200 | 206 | 400 | 404 | 416
//! ```
//!
//! Handlers share one [`HubService`] built at startup. Filesystem work
//! (listing walk, snapshot lookup) runs on the blocking pool; file bodies
//! are streamed.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use datahub_core::{timestamp, types::is_safe_name, DatasetList, DatasetListing, HubConfig};
use datahub_engine::{walk, Packager, StateStore};

use crate::error::{io_err, HubError};

/// Request-handling state shared by every connection.
#[derive(Clone)]
pub struct HubService {
    config: Arc<HubConfig>,
    store: Arc<StateStore>,
    packager: Packager,
}

impl HubService {
    pub fn new(config: Arc<HubConfig>, store: Arc<StateStore>) -> Self {
        let packager = Packager::new(&config.server.cache_dir, config.packaging.keep_versions);
        Self {
            config,
            store,
            packager,
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/datasets", get(list_datasets))
            .route("/package/:file", get(download_package))
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any))
            .with_state(self)
    }

    /// Live metadata for every configured dataset. Blocks on a directory walk.
    pub fn listing(&self) -> DatasetList {
        let datasets = self
            .config
            .datasets
            .iter()
            .map(|ds| {
                let name = ds.name.as_str();
                let files = walk::data_files(&self.config.dataset_dir(ds), &[]);
                let last_updated = files
                    .iter()
                    .map(|f| f.modified)
                    .max()
                    .map(timestamp::format_system_time);
                let latest = self.packager.get_latest_package(name);
                let package_size = latest
                    .as_deref()
                    .and_then(|p| std::fs::metadata(p).ok())
                    .map_or(0, |m| m.len());
                let state = self.store.get(name);
                DatasetListing {
                    name: name.to_owned(),
                    last_updated,
                    file_count: files.len() as u64,
                    total_size: files.iter().map(|f| f.size).sum(),
                    package_ready: latest.is_some(),
                    package_size,
                    freshness: state.get("freshness").cloned().unwrap_or_else(|| json!({})),
                    status: state
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_owned(),
                }
            })
            .collect();
        DatasetList { datasets }
    }

    fn latest_snapshot(&self, name: &str) -> Option<PathBuf> {
        self.packager.get_latest_package(name)
    }
}

/// Serve until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    service: HubService,
    shutdown: CancellationToken,
) -> Result<(), HubError> {
    let addr = listener
        .local_addr()
        .map_err(|e| io_err("http listener", e))?;
    tracing::info!(%addr, "http server listening");
    axum::serve(listener, service.router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| io_err(addr.to_string(), e))?;
    tracing::info!("http server stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_datasets(State(service): State<HubService>) -> Response {
    match tokio::task::spawn_blocking(move || service.listing()).await {
        Ok(list) => Json(list).into_response(),
        Err(err) => internal_error(&err.to_string()),
    }
}

async fn download_package(
    State(service): State<HubService>,
    UrlPath(file): UrlPath<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let Some(name) = file.strip_suffix(".zip") else {
        return not_found(uri).await.into_response();
    };
    if !is_safe_name(name) {
        tracing::warn!(name, "rejected package request");
        return json_error(StatusCode::BAD_REQUEST, json!({ "error": "Invalid dataset name" }));
    }

    let name = name.to_owned();
    let lookup = {
        let service = service.clone();
        let name = name.clone();
        tokio::task::spawn_blocking(move || service.latest_snapshot(&name)).await
    };
    let path = match lookup {
        Ok(Some(path)) => path,
        Ok(None) => {
            return json_error(
                StatusCode::NOT_FOUND,
                json!({ "error": format!("Package not found for dataset: {name}") }),
            )
        }
        Err(err) => return internal_error(&err.to_string()),
    };

    let range = headers
        .get(header::RANGE)
        .map(|v| v.to_str().unwrap_or_default().to_owned());
    match send_snapshot(&path, range.as_deref()).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to send package");
            internal_error(&err.to_string())
        }
    }
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    json_error(
        StatusCode::NOT_FOUND,
        json!({ "error": "Not found", "path": uri.path() }),
    )
}

// ---------------------------------------------------------------------------
// Range transfer
// ---------------------------------------------------------------------------

/// A parsed `Range: bytes=start-end` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Inclusive bounds within the file.
    Satisfiable { start: u64, end: u64 },
    /// Well-formed but outside the file.
    Unsatisfiable,
}

/// Parse a `Range` header against a file of `size` bytes.
///
/// `None` means malformed: anything other than `bytes=<digits>-<digits>?`.
/// Bounds too large for `u64` are unsatisfiable, not malformed.
pub fn parse_range(header: &str, size: u64) -> Option<ByteRange> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if start.is_empty() || !start.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !end.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let Ok(start) = start.parse::<u64>() else {
        return Some(ByteRange::Unsatisfiable);
    };
    let end = if end.is_empty() {
        match size.checked_sub(1) {
            Some(last) => last,
            None => return Some(ByteRange::Unsatisfiable),
        }
    } else {
        match end.parse::<u64>() {
            Ok(end) => end,
            Err(_) => return Some(ByteRange::Unsatisfiable),
        }
    };

    if start >= size || end >= size || start > end {
        return Some(ByteRange::Unsatisfiable);
    }
    Some(ByteRange::Satisfiable { start, end })
}

async fn send_snapshot(path: &Path, range: Option<&str>) -> Result<Response, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        );

    let Some(range) = range else {
        tracing::info!(file = %filename, size, "sending package");
        return Ok(builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from_stream(ReaderStream::new(file)))
            .unwrap_or_else(|_| internal_error("failed to build response")));
    };

    match parse_range(range, size) {
        None => Ok(json_error(
            StatusCode::BAD_REQUEST,
            json!({ "error": "Invalid Range header" }),
        )),
        Some(ByteRange::Unsatisfiable) => Ok(Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{size}"))
            .body(Body::empty())
            .unwrap_or_else(|_| internal_error("failed to build response"))),
        Some(ByteRange::Satisfiable { start, end }) => {
            let length = end - start + 1;
            file.seek(SeekFrom::Start(start)).await?;
            tracing::info!(file = %filename, start, end, "sending package range");
            Ok(builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, length)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .body(Body::from_stream(ReaderStream::new(file.take(length))))
                .unwrap_or_else(|_| internal_error("failed to build response")))
        }
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

fn json_error(status: StatusCode, body: Value) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}

fn internal_error(message: &str) -> Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "Internal server error", "message": message }),
    )
}
