//! Owns the shutdown channel and the background tasks of a command.
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Handles = Vec<(&'static str, JoinHandle<()>)>;

/// Spawns named background tasks and stops them together.
///
/// Every task receives shutdown through a `watch::Receiver<bool>` that flips
/// to `true` once `trigger_shutdown` is called.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Handles>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    fn handles(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles().push((name, handle));
    }

    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Signals shutdown and waits for every task to finish.
    pub async fn shutdown(self) {
        self.trigger_shutdown();
        let handles: Handles = self.handles().drain(..).collect();
        debug!(tasks = handles.len(), "Waiting for background tasks");

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            match result {
                Ok(()) => debug!(task_name = name, "Task shut down gracefully."),
                Err(e) => error!(task_name = name, error = %e, "Task failed during shutdown."),
            }
        }
    }
}
