//! # Internal Metrics
//!
//! Self-observability of the collector daemon.
//!
//! - **`MetricsBuilder`** installs the Prometheus recorder and prepares the
//!   `/metrics` server when metrics are enabled.
//! - **`Metrics`** is the cloneable handle the collector loop records into.
//! - **`MetricsServer`** (`server.rs`) serves the scrape endpoint.
//! - **`SystemCollector`** (`system.rs`) reports the daemon's own CPU and
//!   memory footprint.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use crate::internal_metrics::system::SystemCollector;
use crate::task_manager::TaskManager;
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

pub mod server;
pub mod system;

/// Handles to the collector's metrics.
#[derive(Clone)]
pub struct Metrics {
    pub collector_ticks_total: Counter,
    pub store_write_failures_total: Counter,
    pub store_reconnects_total: Counter,
    pub collector_tick_duration_seconds: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Registers descriptions with the global recorder and creates the handles.
    pub fn new() -> Self {
        metrics::describe_counter!("collector_ticks_total", Unit::Count, "Number of sampling ticks the collector has run.");
        metrics::describe_counter!("samples_written_total", Unit::Count, "Samples stored, labeled by table.");
        metrics::describe_counter!("store_write_failures_total", Unit::Count, "Batch writes that failed and triggered a reconnect.");
        metrics::describe_counter!("store_reconnects_total", Unit::Count, "Successful reconnects after a lost database session.");
        metrics::describe_histogram!("collector_tick_duration_seconds", Unit::Seconds, "Time spent sampling and writing one tick.");
        metrics::describe_gauge!("process_cpu_usage_percent", Unit::Percent, "CPU usage of the collector process itself.");
        metrics::describe_gauge!("process_memory_usage_bytes", Unit::Bytes, "Resident memory of the collector process itself.");

        Self {
            collector_ticks_total: metrics::counter!("collector_ticks_total"),
            store_write_failures_total: metrics::counter!("store_write_failures_total"),
            store_reconnects_total: metrics::counter!("store_reconnects_total"),
            collector_tick_duration_seconds: metrics::histogram!("collector_tick_duration_seconds"),
        }
    }

    /// Handles that record nothing, used when metrics are disabled.
    pub fn disabled() -> Self {
        Self {
            collector_ticks_total: Counter::noop(),
            store_write_failures_total: Counter::noop(),
            store_reconnects_total: Counter::noop(),
            collector_tick_duration_seconds: Histogram::noop(),
        }
    }

    pub fn record_samples_written(&self, table: &'static str, count: u64) {
        metrics::counter!("samples_written_total", "table" => table).increment(count);
    }
}

/// Sets up the metrics system from configuration.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and spawns the `/metrics` server and
    /// the self-usage collector on `task_manager`.
    ///
    /// Any setup failure is logged and leaves metrics disabled; the collector
    /// keeps running without them.
    pub fn build(self, task_manager: &TaskManager) -> (Metrics, Option<SocketAddr>) {
        if !self.config.enabled {
            return (Metrics::disabled(), None);
        }

        let recorder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        ) {
            Ok(builder) => builder.build_recorder(),
            Err(e) => {
                error!("Failed to configure Prometheus recorder: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let handle = recorder.handle();

        let listener = match std::net::TcpListener::bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Metrics::disabled(), None);
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let listener = match listener
            .set_nonblocking(true)
            .and_then(|()| TcpListener::from_std(listener))
        {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to prepare metrics listener: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Metrics::disabled(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, task_manager.get_shutdown_rx());
        task_manager.spawn("MetricsServer", server.run());
        task_manager.spawn(
            "SystemCollector",
            SystemCollector::new().run(task_manager.get_shutdown_rx()),
        );

        (metrics, Some(addr))
    }
}
