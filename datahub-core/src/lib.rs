//! DataHub core library: domain types, configuration, persistence, calendar.
//!
//! Public API surface:
//! - [`types`]: dataset names, freshness results, the per-dataset state machine
//! - [`config`]: hub / client YAML configuration, loading and validation
//! - [`persist`]: atomic JSON persistence shared by hub state and client sync-state
//! - [`calendar`]: trade calendar contract and implementations
//! - [`timestamp`]: fixed-width RFC 3339 timestamps used as watermarks
//! - [`error`]: [`ConfigError`], [`PersistError`], [`CalendarError`]

pub mod calendar;
pub mod config;
pub mod error;
pub mod persist;
pub mod timestamp;
pub mod types;

pub use calendar::{CsvCalendar, TradeCalendar, WeekdayCalendar};
pub use config::{ClientConfig, ClientDatasetConfig, DatasetConfig, HubConfig};
pub use error::{CalendarError, ConfigError, PersistError};
pub use types::{
    CheckEvent, DatasetList, DatasetListing, DatasetName, DatasetState, DatasetStatus,
    FreshnessResult, FreshnessSummary, InvalidTransition,
};
