//! Reports the collector daemon's own CPU and memory usage as gauges.

use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::sync::watch;
use tokio::time;
use tracing::{error, trace};

const SELF_USAGE_INTERVAL: Duration = Duration::from_secs(10);

pub struct SystemCollector {
    system: System,
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn observe(&mut self, pid: Pid) -> bool {
        if !self.system.refresh_process(pid) {
            return false;
        }
        if let Some(process) = self.system.process(pid) {
            metrics::gauge!("process_cpu_usage_percent").set(process.cpu_usage() as f64);
            metrics::gauge!("process_memory_usage_bytes").set(process.memory() as f64);
        }
        true
    }

    /// Updates the gauges every few seconds until shutdown.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                error!("Failed to get current PID: {}", e);
                return;
            }
        };
        let mut interval = time::interval(SELF_USAGE_INTERVAL);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    if !self.observe(pid) {
                        error!(%pid, "Own process no longer visible, stopping self-usage metrics");
                        break;
                    }
                }
            }
        }
        trace!("SystemCollector finished.");
    }
}
