//! Command handlers and the wiring of the collector daemon.

use crate::cli::{Cli, Command, HistoryArgs};
use crate::collector::control::{launch_detached, CollectorControl, ProcessTable};
use crate::collector::pidfile::PidFile;
use crate::collector::{
    Collector, CollectorError, CollectorSettings, CollectorState, CollectorStatus, StartOutcome,
    StopOutcome,
};
use crate::config::Config;
use crate::history::HistoryEngine;
use crate::internal_metrics::{Metrics, MetricsBuilder};
use crate::live;
use crate::sampling::Sources;
use crate::store::{PostgresConnector, StoreConnector};
use crate::task_manager::TaskManager;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::io::Write;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

pub fn connector_for(config: &Config) -> Arc<dyn StoreConnector> {
    Arc::new(PostgresConnector::new(
        config.database.url.clone(),
        config.database.connect_timeout(),
        config.database.write_timeout(),
    ))
}

/// Resolves once SIGINT or SIGTERM arrives.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// The foreground collector with its background tasks.
pub struct CollectorApp {
    task_manager: TaskManager,
    collector: Collector,
    metrics_addr: Option<SocketAddr>,
}

impl CollectorApp {
    pub fn builder(config: Config) -> CollectorAppBuilder {
        CollectorAppBuilder::new(config)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn state(&self) -> watch::Receiver<CollectorState> {
        self.collector.state()
    }

    /// A handle that can trigger shutdown from elsewhere.
    pub fn task_manager(&self) -> TaskManager {
        self.task_manager.clone()
    }

    /// Runs the collector until shutdown, then stops the background tasks.
    pub async fn run(self) -> Result<(), CollectorError> {
        let shutdown_rx = self.task_manager.get_shutdown_rx();
        let result = self.collector.run(shutdown_rx).await;
        self.task_manager.shutdown().await;
        result
    }
}

pub struct CollectorAppBuilder {
    config: Config,
    sources: Option<Sources>,
    connector: Option<Arc<dyn StoreConnector>>,
    metrics: Option<Metrics>,
}

impl CollectorAppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sources: None,
            connector: None,
            metrics: None,
        }
    }

    pub fn sources_override(mut self, sources: Sources) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn connector_override(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Must be called inside a tokio runtime; the metrics server is spawned
    /// here when enabled.
    pub fn build(self) -> CollectorApp {
        let task_manager = TaskManager::new();
        let (metrics, metrics_addr) = match self.metrics {
            Some(metrics) => (metrics, None),
            None => MetricsBuilder::new(self.config.metrics.clone()).build(&task_manager),
        };
        if let Some(addr) = metrics_addr {
            info!(%addr, "Serving metrics");
        }

        let sources = self.sources.unwrap_or_else(Sources::detect);
        let connector = self.connector.unwrap_or_else(|| connector_for(&self.config));
        let settings = CollectorSettings {
            interval: self.config.collector.interval(),
            retry: self.config.retry.clone(),
            pidfile: PidFile::new(&self.config.collector.pidfile),
        };

        CollectorApp {
            task_manager,
            collector: Collector::new(sources, connector, settings, metrics),
            metrics_addr,
        }
    }
}

/// Arguments forwarded to a detached collector so it sees the same
/// configuration as the invoking command.
pub fn collector_args(cli: &Cli) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(path) = &cli.config {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        args.push("--config".into());
        args.push(path.into_os_string());
    }
    if let Some(url) = &cli.database_url {
        args.push("--database-url".into());
        args.push(url.into());
    }
    if let Some(level) = &cli.log_level {
        args.push("--log-level".into());
        args.push(level.into());
    }
    args
}

pub async fn setup_db(config: &Config, out: &mut dyn Write) -> Result<()> {
    let connector = connector_for(config);
    let mut connection = connector
        .connect()
        .await
        .with_context(|| format!("Cannot reach {}", connector.endpoint()))?;
    let result = connection.ensure_schema().await;
    connection.close().await;
    result?;
    writeln!(out, "Database setup complete.")?;
    Ok(())
}

pub fn start_collector(config: &Config, cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let control = CollectorControl::new(PidFile::new(&config.collector.pidfile));
    let args = collector_args(cli);
    match control.start(|| launch_detached(&config.collector.log_file, &args))? {
        StartOutcome::Started { pid } => writeln!(
            out,
            "Collector started with PID {} (log: {}).",
            pid,
            config.collector.log_file.display()
        )?,
        StartOutcome::AlreadyRunning { pid } => {
            writeln!(out, "Collector is already running (PID {}).", pid)?
        }
    }
    Ok(())
}

pub fn stop_collector<T: ProcessTable>(
    control: &CollectorControl<T>,
    out: &mut dyn Write,
) -> Result<()> {
    match control.stop()? {
        StopOutcome::Stopped { pid } => writeln!(out, "Collector stopped (PID {}).", pid)?,
        StopOutcome::NotRunning => writeln!(out, "Collector is not running.")?,
        StopOutcome::Stale { pid: Some(pid) } => writeln!(
            out,
            "Collector process {} not found. Removed stale pidfile.",
            pid
        )?,
        StopOutcome::Stale { pid: None } => {
            writeln!(out, "Collector is not running. Removed unreadable pidfile.")?
        }
    }
    Ok(())
}

pub fn status_collector<T: ProcessTable>(
    control: &CollectorControl<T>,
    out: &mut dyn Write,
) -> Result<()> {
    match control.status()? {
        CollectorStatus::Running { pid, name } => {
            writeln!(out, "Collector is running (PID {}, {}).", pid, name)?
        }
        CollectorStatus::NotRunning => writeln!(out, "Collector is not running.")?,
        CollectorStatus::Stale { pid: Some(pid) } => writeln!(
            out,
            "Collector is not running (removed stale pidfile for PID {}).",
            pid
        )?,
        CollectorStatus::Stale { pid: None } => {
            writeln!(out, "Collector is not running (removed unreadable pidfile).")?
        }
    }
    Ok(())
}

fn log_configuration(config: &Config) {
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Database: {}", crate::store::postgres::redact_url(&config.database.url));
    info!("Interval: {}s", config.collector.interval_seconds);
    info!(
        "Retry: {} attempts, {}s apart",
        config.retry.max_attempts, config.retry.delay_seconds
    );
    info!("Pidfile: {}", config.collector.pidfile.display());
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            config.metrics.listen_address.to_string()
        } else {
            "Disabled".to_string()
        }
    );
    info!("-------------------------------------------------------");
}

pub async fn run_collector(config: Config) -> Result<()> {
    info!("procmon collector starting up...");
    log_configuration(&config);
    let app = CollectorApp::builder(config).build();
    let task_manager = app.task_manager();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received.");
        task_manager.trigger_shutdown();
    });
    app.run().await?;
    info!("Collector stopped.");
    Ok(())
}

pub async fn live_view(config: &Config) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let sources = Sources::detect();
    let live_config = config.live.clone();

    let view_stop = Arc::clone(&stop);
    let mut view =
        tokio::task::spawn_blocking(move || live::run(sources, &live_config, view_stop));

    let result = tokio::select! {
        result = &mut view => result,
        _ = wait_for_signal() => {
            stop.store(true, Ordering::Relaxed);
            view.await
        }
    };
    result
        .context("Live view thread failed")?
        .context("Terminal error")?;
    Ok(())
}

/// Runs `history` and maps the outcome to the exit status: failure only when
/// the store is unreachable.
pub async fn history(config: &Config, args: &HistoryArgs, out: &mut dyn Write) -> ExitCode {
    let engine = HistoryEngine::new(connector_for(config));
    match engine.run(&args.to_request(), out).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) if e.is_connection_failure() => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::SUCCESS
        }
    }
}

/// Dispatches a parsed command line.
pub async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    let mut stdout = std::io::stdout();
    let control = || CollectorControl::new(PidFile::new(&config.collector.pidfile));
    match &cli.command {
        Command::SetupDb => setup_db(&config, &mut stdout).await?,
        Command::StartCollector => start_collector(&config, &cli, &mut stdout)?,
        Command::StopCollector => stop_collector(&control(), &mut stdout)?,
        Command::StatusCollector => status_collector(&control(), &mut stdout)?,
        Command::Live => live_view(&config).await?,
        Command::History(args) => return Ok(history(&config, args, &mut stdout).await),
        Command::RunCollector => run_collector(config).await?,
    }
    Ok(ExitCode::SUCCESS)
}
