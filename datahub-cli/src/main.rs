//! DataHub: dataset freshness hub and snapshot sync client.
//!
//! # Usage
//!
//! ```text
//! datahub hub      [-c config.yaml] [-s .state.json] [-v]
//! datahub check    [-c config.yaml] [-s .state.json] [--json]
//! datahub versions <dataset> [-c config.yaml] [--json]
//! datahub sync     [<dataset> | --all] [-c client.yaml] [-s .last_sync.json] [--dry-run]
//! datahub status   --url http://hub:8080 [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check::CheckArgs, hub::HubArgs, status::StatusArgs, sync::SyncArgs, versions::VersionsArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "datahub",
    version,
    about = "Snapshot quiescent datasets on a hub and pull them onto clients",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler and HTTP server until Ctrl-C / SIGTERM.
    Hub(HubArgs),

    /// Run one freshness pass in the foreground.
    Check(CheckArgs),

    /// List the snapshots kept for a dataset.
    Versions(VersionsArgs),

    /// Pull newer snapshots from the hub.
    Sync(SyncArgs),

    /// Show a hub's dataset listing.
    Status(StatusArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Hub(args) => args.run(),
        Commands::Check(args) => args.run(),
        Commands::Versions(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
