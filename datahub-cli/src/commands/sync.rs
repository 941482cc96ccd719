//! `datahub sync`: pull newer snapshots from the hub.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use datahub_client::{SyncClient, SyncResult};
use datahub_core::config::load_client_config_at;
use datahub_hub::init_tracing;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Dataset to sync (omit when using `--all`).
    pub dataset: Option<String>,

    /// Sync every configured dataset.
    #[arg(long, conflicts_with = "dataset")]
    pub all: bool,

    /// Client configuration file.
    #[arg(short, long, default_value = "client.yaml")]
    pub config: PathBuf,

    /// Sync-state file.
    #[arg(short, long, default_value = ".last_sync.json")]
    pub state: PathBuf,

    /// Only list datasets that would be synced.
    #[arg(long)]
    pub dry_run: bool,

    /// Force debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let config = load_client_config_at(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        let level = if self.verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        };
        init_tracing(level, config.logging.json);

        let mut client = SyncClient::new(config, &self.state);

        if self.dry_run {
            let updates = client.check_updates().context("failed to query hub")?;
            if updates.is_empty() {
                println!("[dry-run] Nothing to sync.");
            }
            for entry in updates {
                println!(
                    "[dry-run] {} would sync (remote {})",
                    entry.name,
                    entry.last_updated.as_deref().unwrap_or("-")
                );
            }
            return Ok(());
        }

        let results = if self.all {
            client.sync_all()
        } else {
            let name = self
                .dataset
                .clone()
                .context("provide a dataset name or use --all")?;
            vec![client.sync_dataset(&name)]
        };

        for result in &results {
            print_result(result);
        }
        let failed = results.iter().filter(|r| !r.success).count();
        println!(
            "Sync completed: {}/{} successful",
            results.len() - failed,
            results.len()
        );
        if failed > 0 {
            bail!("{failed} dataset(s) failed to sync");
        }
        Ok(())
    }
}

fn print_result(result: &SyncResult) {
    if result.success {
        println!("{} '{}' {}", "✓".green(), result.dataset, result.status);
    } else {
        println!(
            "{} '{}' {}: {}",
            "✗".red(),
            result.dataset,
            result.status,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}
