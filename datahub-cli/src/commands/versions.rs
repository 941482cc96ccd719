//! `datahub versions`: snapshots kept in the cache directory.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use datahub_core::{config::load_hub_config_at, timestamp};
use datahub_engine::Packager;

use super::format_size;

#[derive(Args, Debug)]
pub struct VersionsArgs {
    /// Dataset name.
    pub dataset: String,

    /// Hub configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "snapshot")]
    filename: String,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "created")]
    created: String,
}

impl VersionsArgs {
    pub fn run(self) -> Result<()> {
        let config = load_hub_config_at(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if config.dataset(&self.dataset).is_none() {
            bail!("dataset '{}' is not configured", self.dataset);
        }

        let packager = Packager::new(&config.server.cache_dir, config.packaging.keep_versions);
        let versions = packager.list_versions(&self.dataset);

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&versions)
                    .context("failed to serialize versions JSON")?
            );
            return Ok(());
        }

        if versions.is_empty() {
            println!("No snapshots for '{}'.", self.dataset);
            return Ok(());
        }

        let rows: Vec<VersionRow> = versions
            .into_iter()
            .map(|v| VersionRow {
                created: timestamp::parse(&v.created)
                    .map(timestamp::format_age)
                    .unwrap_or(v.created),
                size: format_size(v.size),
                filename: v.filename,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
