//! `datahub status`: a hub's dataset listing.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use datahub_core::{timestamp, DatasetList};

use super::format_size;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Hub base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "dataset")]
    name: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "files")]
    files: u64,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "updated")]
    updated: String,
    #[tabled(rename = "package")]
    package: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let url = format!("{}/api/datasets", self.url.trim_end_matches('/'));
        let list: DatasetList = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.timeout))
            .build()
            .get(&url)
            .call()
            .with_context(|| format!("request to {url} failed"))?
            .into_json()
            .with_context(|| format!("invalid listing from {url}"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&list).context("failed to serialize listing")?
            );
            return Ok(());
        }

        println!(
            "DataHub {} | {} datasets",
            self.url,
            list.datasets.len()
        );
        if list.datasets.is_empty() {
            println!("No datasets configured.");
            return Ok(());
        }

        let rows: Vec<StatusRow> = list
            .datasets
            .into_iter()
            .map(|ds| StatusRow {
                status: match ds.status.as_str() {
                    "ready" => ds.status.green().to_string(),
                    "error" => ds.status.red().to_string(),
                    "not_fresh" | "unstable" => ds.status.yellow().to_string(),
                    _ => ds.status.clone(),
                },
                files: ds.file_count,
                size: format_size(ds.total_size),
                updated: ds
                    .last_updated
                    .as_deref()
                    .and_then(timestamp::parse)
                    .map(timestamp::format_age)
                    .unwrap_or_else(|| "never".into()),
                package: if ds.package_ready {
                    format_size(ds.package_size)
                } else {
                    "-".into()
                },
                name: ds.name,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
