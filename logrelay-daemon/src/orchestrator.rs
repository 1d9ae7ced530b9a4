//! Engine assembly and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `logrelay-daemon`.
//! It takes a validated configuration, builds the distribution engine with
//! an HTTP analyzer client, and drives startup, background reporting and
//! graceful shutdown.
//!
//! # Startup Order
//!
//! 1. PID file
//! 2. Distribution engine (health monitor + processing loop)
//! 3. Background tasks (transition logger, uptime updater, status reporter)
//!
//! # Shutdown Order
//!
//! 1. Background tasks
//! 2. Distribution engine (cancels retries, discards queued packets)
//! 3. PID file removal

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use logrelay_core::config::LogRelayConfig;
use logrelay_core::pipeline::Pipeline;
use logrelay_distributor::{
    AnalyzerEvent, AnalyzerSpec, DistributionEngine, DistributionEngineBuilder,
    DistributionHandle, EngineConfig, HttpAnalyzerClient,
};

use crate::health::{AnalyzerHealth, DaemonHealth, aggregate_status};
use crate::metrics_server;

/// Interval of the periodic queue/analyzer status log line.
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Interval of the uptime gauge refresh.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: LogRelayConfig,
    /// The distribution engine.
    engine: DistributionEngine<HttpAnalyzerClient>,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Orchestrator creation time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// Loads `logrelay.toml`, applies `LOGRELAY_*` environment overrides and
    /// validates the result before building.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated, or
    /// if [`Orchestrator::build_from_config`] fails.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogRelayConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;

        Self::build_from_config(config)
    }

    /// Build the orchestrator from an already loaded configuration.
    ///
    /// Installs the Prometheus recorder when `[metrics]` is enabled, so call
    /// this at most once per process with metrics on.
    ///
    /// # Errors
    ///
    /// - Configuration validation fails
    /// - The metrics endpoint cannot be installed
    /// - The HTTP client or the distribution engine cannot be built
    pub fn build_from_config(config: LogRelayConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let engine_config = EngineConfig::from_core(&config.distribution, &config.health_check);
        let client = HttpAnalyzerClient::new()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

        let engine = DistributionEngineBuilder::new()
            .config(engine_config)
            .client(client)
            .analyzers(config.analyzers.iter().map(AnalyzerSpec::from_core))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build distribution engine: {e}"))?;

        if config.analyzers.is_empty() {
            tracing::warn!("no analyzers configured, packets will be retried until dropped");
        }

        tracing::info!(
            analyzers = config.analyzers.len(),
            batch_size = config.distribution.batch_size,
            max_retries = config.distribution.max_retries,
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            record_daemon_metrics();
        }

        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Self {
            config,
            engine,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the engine and block until `SIGTERM` or `SIGINT`.
    pub async fn run(&mut self) -> Result<()> {
        let signal = wait_for_shutdown_signal()?;
        self.run_until(async move {
            let name = signal.await;
            tracing::info!(signal = name, "shutdown signal received");
        })
        .await
    }

    /// Start the engine and block until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// - The PID file already exists or cannot be written
    /// - The engine fails to start or stop
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let pid_file = self.pid_file_path();
        if let Some(path) = &pid_file {
            write_pid_file(path)?;
        }

        tracing::info!("starting distribution engine");
        if let Err(e) = self.engine.start().await {
            tracing::error!(error = %e, "distribution engine failed to start");
            if let Some(path) = &pid_file {
                remove_pid_file(path);
            }
            return Err(e.into());
        }

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(spawn_transition_logger(
            self.engine.subscribe(),
            self.shutdown_tx.subscribe(),
        ));
        tasks.push(spawn_status_reporter(
            self.engine.handle(),
            STATUS_REPORT_INTERVAL,
            self.shutdown_tx.subscribe(),
        ));
        if self.config.metrics.enabled {
            tasks.push(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ));
        }

        tracing::info!("entering main loop");
        shutdown.await;

        tracing::info!("broadcasting shutdown signal to all tasks");
        let _ = self.shutdown_tx.send(());
        for task in tasks {
            let _ = task.await;
        }

        let stop_result = self.engine.stop().await;

        if let Some(path) = &pid_file {
            remove_pid_file(path);
        }

        stop_result.map_err(Into::into)
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let engine_status = self.engine.health_check().await;
        let analyzers: Vec<AnalyzerHealth> = self
            .engine
            .registry()
            .list_analyzers()
            .into_iter()
            .map(AnalyzerHealth::from)
            .collect();

        DaemonHealth {
            status: aggregate_status(&engine_status, &analyzers),
            uptime_secs: self.start_time.elapsed().as_secs(),
            queue: self.engine.queue_status(),
            analyzers,
        }
    }

    /// Cloneable handle for submitting packets.
    pub fn handle(&self) -> DistributionHandle<HttpAnalyzerClient> {
        self.engine.handle()
    }

    /// Reference to the loaded configuration.
    pub fn config(&self) -> &LogRelayConfig {
        &self.config
    }

    fn pid_file_path(&self) -> Option<PathBuf> {
        let pid_file = self.config.general.pid_file.trim();
        (!pid_file.is_empty()).then(|| PathBuf::from(pid_file))
    }
}

/// Install SIGTERM/SIGINT handlers and return a future resolving to the
/// name of the first signal received.
///
/// Handlers are installed eagerly so a failure surfaces before startup.
fn wait_for_shutdown_signal() -> Result<impl Future<Output = &'static str> + Send> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {e}"))?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - `create_new(true)` fails if the file exists, so a running instance is never overwritten
/// - The created path must be a regular file
/// - Parent directory is created with mode 0o700, the file with 0o600
///
/// # Errors
///
/// Returns an error if the PID file exists or cannot be written.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(parent)?;
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{pid}")?;

    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on shutdown. Failures are logged, not returned.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    }
}

/// Log every analyzer online/offline transition until shutdown.
fn spawn_transition_logger(
    mut events: broadcast::Receiver<AnalyzerEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(AnalyzerEvent::Online { id }) => {
                        tracing::info!(analyzer = %id, "analyzer back online");
                    }
                    Ok(AnalyzerEvent::Offline { id, consecutive_failures }) => {
                        tracing::warn!(
                            analyzer = %id,
                            consecutive_failures,
                            "analyzer marked offline"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "transition logger lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown_rx.recv() => {
                    tracing::debug!("transition logger shutting down");
                    break;
                }
            }
        }
    })
}

/// Periodically log queue depth and analyzer availability.
fn spawn_status_reporter(
    handle: DistributionHandle<HttpAnalyzerClient>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = handle.stats();
                    tracing::info!(
                        queue_length = stats.queue.length,
                        scheduled_retries = stats.queue.scheduled_retries,
                        online_analyzers = stats.online_analyzers,
                        total_analyzers = stats.total_analyzers,
                        delivered = stats.delivery.delivered,
                        dropped = stats.delivery.dropped,
                        "distribution status"
                    );
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

/// Record static daemon metrics.
fn record_daemon_metrics() {
    use logrelay_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

/// Refresh the uptime gauge until shutdown.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    use logrelay_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(secs_as_f64(start_time.elapsed().as_secs()));
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[allow(clippy::cast_precision_loss)]
fn secs_as_f64(secs: u64) -> f64 {
    secs as f64
}
