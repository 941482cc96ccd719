use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use datahub_core::{calendar, config::load_hub_config_at, HubConfig, TradeCalendar};
use datahub_engine::StateStore;

use crate::error::{io_err, HubError};
use crate::scheduler::Scheduler;
use crate::server::{self, HubService};

/// Application context: owns the scheduler and the HTTP service, and the
/// single token that stops both.
pub struct Hub {
    config: Arc<HubConfig>,
    store: Arc<StateStore>,
    scheduler: Scheduler,
    service: HubService,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(
        config: Arc<HubConfig>,
        store: Arc<StateStore>,
        calendar: Arc<dyn TradeCalendar>,
    ) -> Self {
        let scheduler = Scheduler::new(config.clone(), store.clone(), calendar);
        let service = HubService::new(config.clone(), store.clone());
        Self {
            config,
            store,
            scheduler,
            service,
            shutdown: CancellationToken::new(),
        }
    }

    /// Load the YAML config, the calendar it names (relative to the config
    /// file's directory), and the state file.
    pub fn from_config_file(config_path: &Path, state_path: &Path) -> Result<Self, HubError> {
        let config = load_hub_config_at(config_path)?;
        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let calendar = calendar::from_config(&config.calendar, &base_dir)?;
        let store = StateStore::open(state_path);
        Ok(Self::new(Arc::new(config), Arc::new(store), calendar))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn service(&self) -> &HubService {
        &self.service
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the scheduler and serve HTTP on `listener` until [`Hub::shutdown`]
    /// runs (or the token from [`Hub::shutdown_token`] is cancelled).
    pub async fn serve_on(&self, listener: TcpListener) -> Result<(), HubError> {
        self.scheduler.start();
        let server = {
            let service = self.service.clone();
            let token = self.shutdown.clone();
            tokio::spawn(async move { server::serve(listener, service, token).await })
        };
        let result = handle_join("http_server", server.await);
        self.scheduler.stop().await;
        result
    }

    /// Bind `server.host:server.port` and run until Ctrl-C or SIGTERM.
    pub async fn run(&self) -> Result<(), HubError> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| io_err(&addr, e))?;
        tracing::info!(
            %addr,
            datasets = self.config.datasets.len(),
            interval_minutes = self.config.check.interval_minutes,
            "hub starting"
        );

        let signals = {
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = wait_for_signal() => {
                        tracing::info!("received shutdown signal");
                        token.cancel();
                    }
                }
            })
        };

        let result = self.serve_on(listener).await;
        self.shutdown.cancel();
        let _ = signals.await;
        tracing::info!("hub stopped");
        result
    }

    /// Stop the scheduler, then the HTTP server.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.shutdown.cancel();
    }
}

/// Run the hub on a fresh multi-threaded runtime, blocking until it exits.
pub fn start_blocking(config_path: &Path, state_path: &Path, verbose: bool) -> Result<(), HubError> {
    let hub = Hub::from_config_file(config_path, state_path)?;
    let level = if verbose {
        "debug"
    } else {
        hub.config().logging.level.as_str()
    };
    init_tracing(level, hub.config().logging.json);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(hub.run())
}

/// Install the global subscriber on stderr. `RUST_LOG` wins over `level`;
/// repeat calls are no-ops.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.with_target(false).try_init();
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn handle_join(
    task: &str,
    result: Result<Result<(), HubError>, tokio::task::JoinError>,
) -> Result<(), HubError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(HubError::Task(format!("{task} task join failure: {err}"))),
    }
}
