//! # datahub-engine
//!
//! The synchronous building blocks the hub scheduler drives:
//!
//! - [`StateStore`]: durable per-dataset status fields
//! - [`FreshnessChecker`]: freshness ratio, watermark, and debounce check
//! - [`Packager`]: timestamped zip snapshots with retention
//!
//! Everything here blocks on filesystem I/O; async callers run it on a
//! blocking worker.

pub mod error;
pub mod freshness;
pub mod packager;
pub mod state_store;
pub mod walk;

pub use error::EngineError;
pub use freshness::{FreshnessChecker, FreshnessStats};
pub use packager::{PackageOutcome, Packaged, Packager, SnapshotInfo};
pub use state_store::{Fields, StateStore};
