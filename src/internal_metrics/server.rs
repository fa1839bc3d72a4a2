//! # Metrics Server
//!
//! An `axum` server exposing the Prometheus exposition format on `/metrics`
//! until shutdown is signalled.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

pub struct MetricsServer {
    listener: TcpListener,
    prom_handle: PrometheusHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// Creates the server around an already bound listener. Nothing is served
    /// until the future returned by `run` is polled.
    pub fn new(
        listener: TcpListener,
        prom_handle: PrometheusHandle,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            prom_handle,
            shutdown_rx,
        }
    }

    /// Returns a future that serves scrapes until shutdown.
    pub fn run(self) -> impl Future<Output = ()> {
        let Self {
            listener,
            prom_handle,
            mut shutdown_rx,
        } = self;
        let app = Router::new().route("/metrics", get(move || async move { prom_handle.render() }));

        async move {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    trace!("Metrics server received shutdown signal.");
                }
                result = axum::serve(listener, app.into_make_service()) => {
                    if let Err(e) = result {
                        error!("Metrics server error: {}", e);
                    }
                }
            }
            trace!("Metrics server task finished.");
        }
    }
}
