//! Domain types for DataHub.
//!
//! The per-dataset state machine lives here as an explicit enum with a single
//! transition function so the scheduler, the state store, and the HTTP listing
//! all agree on what a status string means.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Threshold used when a freshness summary is rendered without a dataset config.
pub const DEFAULT_FRESHNESS_THRESHOLD: f64 = 0.85;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed dataset name (the unique key in config, state, and URLs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetName(pub String);

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if the name can be used as a filename prefix and URL segment:
    /// non-empty, no path separators, no `..`.
    pub fn is_safe(&self) -> bool {
        is_safe_name(&self.0)
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DatasetName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DatasetName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Rejects empty names, `/`, `\`, and any `..` component.
pub fn is_safe_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Status of a dataset within one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    Checking,
    NotFresh,
    Debounce,
    Unstable,
    Packaging,
    Ready,
    Error,
}

/// Something the scheduler observed while driving a dataset through a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckEvent {
    BelowThreshold,
    AboveThreshold,
    /// The debounce re-check agreed with the first sample.
    Stable,
    /// The debounce re-check disagreed, or the wait was cancelled.
    Unstable,
    Packaged,
    PackageFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: DatasetStatus,
    pub event: CheckEvent,
}

impl DatasetStatus {
    /// The one authoritative transition function.
    pub fn transition(self, event: CheckEvent) -> Result<DatasetStatus, InvalidTransition> {
        use CheckEvent as E;
        use DatasetStatus as S;

        match (self, event) {
            (S::Checking, E::BelowThreshold) => Ok(S::NotFresh),
            (S::Checking, E::AboveThreshold) => Ok(S::Debounce),
            (S::Debounce, E::Stable) => Ok(S::Packaging),
            (S::Debounce, E::Unstable) => Ok(S::Unstable),
            (S::Packaging, E::Packaged) => Ok(S::Ready),
            (S::Packaging, E::PackageFailed) => Ok(S::Error),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    /// Whether the current tick's cycle ends in this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DatasetStatus::NotFresh
                | DatasetStatus::Unstable
                | DatasetStatus::Ready
                | DatasetStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetStatus::Checking => "checking",
            DatasetStatus::NotFresh => "not_fresh",
            DatasetStatus::Debounce => "debounce",
            DatasetStatus::Unstable => "unstable",
            DatasetStatus::Packaging => "packaging",
            DatasetStatus::Ready => "ready",
            DatasetStatus::Error => "error",
        }
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Freshness
// ---------------------------------------------------------------------------

/// Outcome of one freshness check.
///
/// Fields are private: the ratio is always derived from the counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "FreshnessSummary")]
pub struct FreshnessResult {
    total_count: usize,
    fresh_count: usize,
    fresh_ratio: f64,
    last_updated: String,
}

impl FreshnessResult {
    /// `fresh` is clamped to `total`; the ratio is `0.0` for an empty dataset.
    pub fn new(total_count: usize, fresh_count: usize, last_updated: impl Into<String>) -> Self {
        let fresh_count = fresh_count.min(total_count);
        let fresh_ratio = if total_count == 0 {
            0.0
        } else {
            fresh_count as f64 / total_count as f64
        };
        Self {
            total_count,
            fresh_count,
            fresh_ratio,
            last_updated: last_updated.into(),
        }
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn fresh_count(&self) -> usize {
        self.fresh_count
    }

    pub fn fresh_ratio(&self) -> f64 {
        self.fresh_ratio
    }

    /// The 85th-percentile mtime watermark.
    pub fn last_updated(&self) -> &str {
        &self.last_updated
    }

    /// Inclusive: a ratio exactly at the threshold is fresh.
    pub fn is_fresh(&self, threshold: f64) -> bool {
        self.fresh_ratio >= threshold
    }

    pub fn summary(&self) -> FreshnessSummary {
        FreshnessSummary {
            total_count: self.total_count,
            fresh_count: self.fresh_count,
            fresh_ratio: (self.fresh_ratio * 10_000.0).round() / 10_000.0,
            last_updated: self.last_updated.clone(),
            is_fresh: self.is_fresh(DEFAULT_FRESHNESS_THRESHOLD),
        }
    }
}

/// Wire / state-file form of a [`FreshnessResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessSummary {
    pub total_count: usize,
    pub fresh_count: usize,
    pub fresh_ratio: f64,
    pub last_updated: String,
    pub is_fresh: bool,
}

impl From<FreshnessResult> for FreshnessSummary {
    fn from(result: FreshnessResult) -> Self {
        result.summary()
    }
}

// ---------------------------------------------------------------------------
// Persisted state view
// ---------------------------------------------------------------------------

/// Typed, lenient view of one state-store entry.
///
/// Every field is optional; unknown keys survive in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetState {
    pub status: Option<DatasetStatus>,
    pub freshness: Option<FreshnessSummary>,
    pub last_checked: Option<String>,
    pub last_packaged_at: Option<String>,
    pub package_path: Option<String>,
    pub package_size: Option<u64>,
    pub file_count: Option<usize>,
    pub last_updated: Option<String>,
    pub error: Option<String>,
    pub state_updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One entry of `GET /api/datasets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetListing {
    pub name: String,
    /// Max mtime of the live tree; `null` when the tree is empty or missing.
    pub last_updated: Option<String>,
    pub file_count: u64,
    pub total_size: u64,
    pub package_ready: bool,
    pub package_size: u64,
    /// Last freshness summary recorded by the scheduler, or `{}`.
    #[serde(default)]
    pub freshness: serde_json::Value,
    /// Last recorded status, or `"unknown"`.
    pub status: String,
}

/// Body of `GET /api/datasets`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetList {
    pub datasets: Vec<DatasetListing>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
