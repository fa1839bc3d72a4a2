//! The collector loop: samples processes and GPUs on a fixed interval and
//! persists each tick's batches.

pub mod control;
pub mod pidfile;

use crate::internal_metrics::Metrics;
use crate::sampling::Sources;
use crate::store::{connect_with_retry, RetryPolicy, StoreConnection, StoreConnector, StoreError};
use pidfile::{PidFile, PidFileError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub use control::{CollectorControl, CollectorStatus, StartOutcome, StopOutcome};

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Collector stopped: {0}")]
    ConnectionExhausted(#[source] StoreError),

    #[error(transparent)]
    Pidfile(#[from] PidFileError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Stopped,
    Starting,
    Running,
    Reconnecting,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub pidfile: PidFile,
}

pub struct Collector {
    sources: Sources,
    connector: Arc<dyn StoreConnector>,
    settings: CollectorSettings,
    metrics: Metrics,
    state_tx: watch::Sender<CollectorState>,
}

impl Collector {
    pub fn new(
        sources: Sources,
        connector: Arc<dyn StoreConnector>,
        settings: CollectorSettings,
        metrics: Metrics,
    ) -> Self {
        let (state_tx, _) = watch::channel(CollectorState::Stopped);
        Self {
            sources,
            connector,
            settings,
            metrics,
            state_tx,
        }
    }

    /// Subscribes to state transitions.
    pub fn state(&self) -> watch::Receiver<CollectorState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: CollectorState) {
        debug!(?state, "Collector state change");
        self.state_tx.send_replace(state);
    }

    /// Runs until shutdown is signalled or the store stays unreachable for a
    /// whole retry cycle. The pidfile exists for exactly the duration of the
    /// call.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), CollectorError> {
        self.set_state(CollectorState::Starting);
        let pidfile_guard = match self.settings.pidfile.claim(std::process::id()) {
            Ok(guard) => guard,
            Err(e) => {
                self.set_state(CollectorState::Stopped);
                return Err(e.into());
            }
        };

        let result = self.collect(&mut shutdown_rx).await;

        self.set_state(CollectorState::Stopping);
        drop(pidfile_guard);
        self.set_state(CollectorState::Stopped);
        result
    }

    async fn connect(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<Option<Box<dyn StoreConnection>>, CollectorError> {
        match connect_with_retry(self.connector.as_ref(), &self.settings.retry, shutdown_rx).await {
            Ok(connection) => Ok(Some(connection)),
            Err(StoreError::Shutdown) => Ok(None),
            Err(e) => {
                error!(error = %e, "Giving up on the database");
                Err(CollectorError::ConnectionExhausted(e))
            }
        }
    }

    async fn collect(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<(), CollectorError> {
        let Some(mut connection) = self.connect(shutdown_rx).await? else {
            return Ok(());
        };
        self.set_state(CollectorState::Running);
        info!(
            interval = ?self.settings.interval,
            gpu = self.sources.gpus.capability().is_present(),
            endpoint = %self.connector.endpoint(),
            "Collector running"
        );

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Collector received shutdown signal.");
                    break;
                }
                _ = interval.tick() => {}
            }

            if let Err(e) = self.tick(connection.as_mut()).await {
                warn!(error = %e, "Write failed, reconnecting");
                self.metrics.store_write_failures_total.increment(1);
                self.set_state(CollectorState::Reconnecting);
                connection.close().await;

                match self.connect(shutdown_rx).await? {
                    Some(fresh) => {
                        connection = fresh;
                        self.metrics.store_reconnects_total.increment(1);
                        self.set_state(CollectorState::Running);
                    }
                    None => return Ok(()),
                }
            }
        }

        connection.close().await;
        Ok(())
    }

    /// One sampling tick. A failed batch aborts the rest of the tick.
    async fn tick(&self, connection: &mut dyn StoreConnection) -> Result<(), StoreError> {
        let started = Instant::now();
        let processes = self.sources.processes.sample_processes();
        let gpus = self.sources.gpus.sample_gpus();

        if !processes.is_empty() {
            let written = connection.insert_processes(&processes).await?;
            self.metrics.record_samples_written("processes", written);
        }
        if !gpus.is_empty() {
            let written = connection.insert_gpus(&gpus).await?;
            self.metrics.record_samples_written("gpu_usage", written);
        }

        self.metrics.collector_ticks_total.increment(1);
        self.metrics
            .collector_tick_duration_seconds
            .record(started.elapsed().as_secs_f64());
        debug!(processes = processes.len(), gpus = gpus.len(), "Tick complete");
        Ok(())
    }
}
