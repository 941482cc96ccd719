//! `datahub check`: one freshness pass in the foreground.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use datahub_core::DatasetStatus;
use datahub_hub::{init_tracing, DatasetOutcome, Hub, PassReport};

use super::HubPaths;

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub paths: HubPaths,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct CheckReportJson<'a> {
    #[serde(flatten)]
    report: &'a PassReport,
    state: Value,
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "dataset")]
    dataset: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "fresh")]
    fresh: String,
    #[tabled(rename = "watermark")]
    watermark: String,
    #[tabled(rename = "error")]
    error: String,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let hub = Hub::from_config_file(&self.paths.config, &self.paths.state)
            .with_context(|| format!("failed to load {}", self.paths.config.display()))?;
        init_tracing(&hub.config().logging.level, hub.config().logging.json);

        let report = hub.scheduler().run_pass();

        if self.json {
            let state = serde_json::to_value(hub.store().get_all())
                .context("failed to serialize state")?;
            let payload = CheckReportJson {
                report: &report,
                state,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize check JSON")?
            );
            return Ok(());
        }

        let Some(trade_date) = report.trade_date else {
            println!("{}", "No trade date available; pass skipped.".yellow());
            return Ok(());
        };
        println!("Trade date {trade_date}");

        let rows: Vec<CheckRow> = report
            .outcomes
            .iter()
            .map(|(name, outcome)| {
                let fields = hub.store().get(name);
                let freshness = fields.get("freshness");
                CheckRow {
                    dataset: name.clone(),
                    status: outcome_label(outcome),
                    fresh: freshness
                        .map(|f| {
                            format!(
                                "{}/{}",
                                f["fresh_count"].as_u64().unwrap_or(0),
                                f["total_count"].as_u64().unwrap_or(0)
                            )
                        })
                        .unwrap_or_else(|| "-".into()),
                    watermark: freshness
                        .and_then(|f| f["last_updated"].as_str())
                        .unwrap_or("-")
                        .to_owned(),
                    error: fields
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_owned(),
                }
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn outcome_label(outcome: &DatasetOutcome) -> String {
    match outcome {
        DatasetOutcome::Completed(status) => status_label(*status),
        DatasetOutcome::Busy => "busy".yellow().to_string(),
        DatasetOutcome::Panicked(_) => "panicked".red().to_string(),
    }
}

fn status_label(status: DatasetStatus) -> String {
    let text = status.as_str();
    match status {
        DatasetStatus::Ready => text.green().to_string(),
        DatasetStatus::Error => text.red().to_string(),
        DatasetStatus::NotFresh | DatasetStatus::Unstable => text.yellow().to_string(),
        _ => text.to_string(),
    }
}
