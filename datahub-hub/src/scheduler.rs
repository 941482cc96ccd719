//! Periodic check → debounce → package loop.
//!
//! Every pass resolves the current trade date, then drives each configured
//! dataset through one tick of the [`DatasetStatus`] state machine:
//!
//! ```text
//! checking ─┬─ below threshold ─────────────────────────────▶ not_fresh
//!           └─ above threshold ─▶ debounce ─┬─ unstable ────▶ unstable
//!                                           └─ stable ─▶ packaging ─┬─▶ ready
//!                                                                   └─▶ error
//! ```
//!
//! Passes run on the blocking pool. A per-dataset lock keeps a forced pass
//! and the periodic pass from working on the same dataset at once; the
//! second one skips it.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use datahub_core::{
    timestamp, CheckEvent, DatasetConfig, DatasetStatus, HubConfig, TradeCalendar,
};
use datahub_engine::{FreshnessChecker, Packager, StateStore};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to one dataset during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum DatasetOutcome {
    /// The tick ran to a terminal status.
    Completed(DatasetStatus),
    /// Another pass held this dataset's lock.
    Busy,
    /// The tick panicked; the rest of the pass continued.
    Panicked(String),
}

/// Per-dataset results of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// `None` when the calendar had no date and the pass was skipped.
    pub trade_date: Option<NaiveDate>,
    pub outcomes: BTreeMap<String, DatasetOutcome>,
}

impl PassReport {
    pub fn status(&self, dataset: &str) -> Option<DatasetStatus> {
        match self.outcomes.get(dataset)? {
            DatasetOutcome::Completed(status) => Some(*status),
            _ => None,
        }
    }

    pub fn skipped(&self) -> bool {
        self.trade_date.is_none()
    }
}

struct DatasetSlot {
    config: DatasetConfig,
    checker: FreshnessChecker,
    lock: Mutex<()>,
}

struct Inner {
    config: Arc<HubConfig>,
    store: Arc<StateStore>,
    calendar: Arc<dyn TradeCalendar>,
    packager: Packager,
    datasets: Vec<DatasetSlot>,
    cancel: CancellationToken,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: Arc<HubConfig>,
        store: Arc<StateStore>,
        calendar: Arc<dyn TradeCalendar>,
    ) -> Self {
        let datasets = config
            .datasets
            .iter()
            .map(|ds| DatasetSlot {
                checker: FreshnessChecker::for_dataset(&config, ds),
                config: ds.clone(),
                lock: Mutex::new(()),
            })
            .collect();
        let packager = Packager::new(&config.server.cache_dir, config.packaging.keep_versions);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                calendar,
                packager,
                datasets,
                cancel: CancellationToken::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the periodic loop on the current tokio runtime: one pass
    /// immediately, then one every `check.interval_minutes`.
    ///
    /// Calling `start` twice keeps the first worker.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            tracing::warn!("scheduler already running");
            return;
        }
        let inner = Arc::clone(&self.inner);
        *worker = Some(tokio::spawn(run_loop(inner)));
        tracing::info!(
            interval_minutes = self.inner.config.check.interval_minutes,
            datasets = self.inner.datasets.len(),
            "scheduler started"
        );
    }

    /// Run one extra pass on its own blocking worker.
    pub fn force_check(&self) -> JoinHandle<PassReport> {
        tracing::info!("forced check requested");
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.run_pass(today()))
    }

    /// Run one pass on the calling thread (blocks).
    pub fn run_pass(&self) -> PassReport {
        self.inner.run_pass(today())
    }

    /// Run one pass as if today were `today`.
    pub fn run_pass_on(&self, today: NaiveDate) -> PassReport {
        self.inner.run_pass(today)
    }

    /// Raise the stop signal and wait up to five seconds for the loop to end.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return;
        };
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => tracing::info!("scheduler stopped"),
            Ok(Err(err)) => tracing::error!(error = %err, "scheduler task failed"),
            Err(_) => tracing::warn!("scheduler did not stop within {STOP_TIMEOUT:?}"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}

async fn run_loop(inner: Arc<Inner>) {
    let interval = Duration::from_secs(inner.config.check.interval_minutes.saturating_mul(60));
    loop {
        let pass = Arc::clone(&inner);
        match tokio::task::spawn_blocking(move || pass.run_pass(today())).await {
            Ok(report) => tracing::debug!(?report, "scheduled pass finished"),
            Err(err) => tracing::error!(error = %err, "scheduled pass failed to join"),
        }

        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl Inner {
    fn run_pass(&self, today: NaiveDate) -> PassReport {
        self.run_pass_with(today, |slot, trade_date| self.tick(slot, trade_date))
    }

    /// Drive every dataset through `tick`, isolating panics per dataset.
    fn run_pass_with<F>(&self, today: NaiveDate, tick: F) -> PassReport
    where
        F: Fn(&DatasetSlot, NaiveDate) -> DatasetStatus,
    {
        let Some(trade_date) = self.calendar.last_trade_date_before(today) else {
            tracing::warn!(%today, "no trade date available, skipping pass");
            return PassReport::default();
        };
        tracing::info!(%trade_date, datasets = self.datasets.len(), "pass started");

        let mut report = PassReport {
            trade_date: Some(trade_date),
            outcomes: BTreeMap::new(),
        };
        for slot in &self.datasets {
            let name = slot.config.name.to_string();
            let Some(_guard) = slot.lock.try_lock() else {
                tracing::info!(dataset = %name, "check already in progress, skipping");
                report.outcomes.insert(name, DatasetOutcome::Busy);
                continue;
            };
            let outcome =
                match panic::catch_unwind(AssertUnwindSafe(|| tick(slot, trade_date))) {
                    Ok(status) => DatasetOutcome::Completed(status),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(dataset = %name, error = %message, "dataset check panicked");
                        self.store.update(
                            &name,
                            [
                                ("status", json!(DatasetStatus::Error)),
                                ("error", json!(message)),
                            ],
                        );
                        DatasetOutcome::Panicked(message)
                    }
                };
            report.outcomes.insert(name, outcome);
        }
        report
    }

    /// One tick of the state machine for one dataset. Returns the terminal status.
    fn tick(&self, slot: &DatasetSlot, trade_date: NaiveDate) -> DatasetStatus {
        let name = slot.config.name.as_str();
        let threshold = slot.config.freshness_threshold;

        let mut status = DatasetStatus::Checking;
        self.record(name, status, []);

        let first = slot.checker.check(trade_date);
        let checked_at = timestamp::now();
        if !first.is_fresh(threshold) {
            status = advance(name, status, CheckEvent::BelowThreshold);
            self.record(
                name,
                status,
                [
                    ("freshness", json!(first)),
                    ("last_checked", json!(checked_at)),
                ],
            );
            tracing::info!(dataset = name, ratio = first.fresh_ratio(), threshold, "not fresh yet");
            return status;
        }

        status = advance(name, status, CheckEvent::AboveThreshold);
        self.record(
            name,
            status,
            [
                ("freshness", json!(first)),
                ("last_checked", json!(checked_at)),
            ],
        );

        let debounce = self.config.check.debounce_seconds;
        let Some(stable) = slot.checker.check_stable(trade_date, debounce, &self.cancel) else {
            status = advance(name, status, CheckEvent::Unstable);
            self.record(name, status, [("last_checked", json!(timestamp::now()))]);
            return status;
        };

        status = advance(name, status, CheckEvent::Stable);
        self.record(
            name,
            status,
            [
                ("freshness", json!(stable)),
                ("last_checked", json!(timestamp::now())),
            ],
        );

        let source = self.config.dataset_dir(&slot.config);
        match self.packager.try_package(name, &source) {
            Ok(packaged) => {
                status = advance(name, status, CheckEvent::Packaged);
                self.record(
                    name,
                    status,
                    [
                        ("last_packaged_at", json!(timestamp::now())),
                        ("package_path", json!(packaged.path.display().to_string())),
                        ("package_size", json!(packaged.size)),
                        ("file_count", json!(packaged.file_count)),
                        ("last_updated", json!(stable.last_updated())),
                        ("error", Value::Null),
                    ],
                );
                tracing::info!(
                    dataset = name,
                    path = %packaged.path.display(),
                    files = packaged.file_count,
                    size = packaged.size,
                    "dataset ready"
                );
            }
            Err(err) => {
                status = advance(name, status, CheckEvent::PackageFailed);
                self.record(name, status, [("error", json!(err.to_string()))]);
                tracing::error!(dataset = name, error = %err, "packaging failed, retrying next tick");
            }
        }
        status
    }

    fn record<const N: usize>(
        &self,
        name: &str,
        status: DatasetStatus,
        fields: [(&'static str, Value); N],
    ) {
        self.store.update(
            name,
            std::iter::once(("status", json!(status))).chain(fields),
        );
    }
}

/// Apply `event`; an illegal transition is logged and lands in `error`.
fn advance(dataset: &str, status: DatasetStatus, event: CheckEvent) -> DatasetStatus {
    status.transition(event).unwrap_or_else(|err| {
        tracing::error!(dataset, error = %err, "illegal state transition");
        DatasetStatus::Error
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_owned()
    }
}
