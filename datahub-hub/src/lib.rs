//! Hub runtime: periodic freshness scheduler plus the HTTP distribution
//! endpoint, owned by one [`Hub`] context.

mod error;
pub mod runtime;
pub mod scheduler;
pub mod server;

pub use error::HubError;
pub use runtime::{init_tracing, start_blocking, Hub};
pub use scheduler::{DatasetOutcome, PassReport, Scheduler};
pub use server::{parse_range, serve, ByteRange, HubService};
