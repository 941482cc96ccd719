//! `datahub hub`: long-running scheduler + HTTP server.

use anyhow::{Context, Result};
use clap::Args;

use super::HubPaths;

#[derive(Args, Debug)]
pub struct HubArgs {
    #[command(flatten)]
    pub paths: HubPaths,

    /// Force debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl HubArgs {
    pub fn run(self) -> Result<()> {
        datahub_hub::start_blocking(&self.paths.config, &self.paths.state, self.verbose)
            .with_context(|| format!("hub exited with error ({})", self.paths.config.display()))
    }
}
