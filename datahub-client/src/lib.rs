//! Pull side of the hub: compares the hub's dataset listing with a local
//! sync-state file and downloads and extracts newer snapshots.

pub mod client;
mod error;
pub mod state;

pub use client::{extract_package, SyncClient, SyncResult, SyncStatus};
pub use error::ClientError;
pub use state::SyncState;
