//! Lifecycle control of the background collector through its pidfile:
//! status, stop and detached start.

use super::pidfile::{PidFile, PidFileError};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use sysinfo::{Pid, Signal, System};
use thiserror::Error;
use tracing::{debug, info};

/// Argument that marks a process as a foreground collector.
pub const RUN_COLLECTOR_ARG: &str = "run-collector";

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    PidFile(#[from] PidFileError),

    #[error("Failed to launch the collector: {0}")]
    Launch(#[source] io::Error),
}

/// What the process table knows about a pid.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub name: String,
    pub cmd: Vec<String>,
}

impl ProcessInfo {
    /// Whether this process is a procmon collector.
    ///
    /// The command line is authoritative; when it is unreadable the process
    /// name is used instead.
    pub fn is_collector(&self) -> bool {
        if self.cmd.is_empty() {
            return self.name.starts_with("procmon");
        }
        self.cmd.iter().any(|arg| arg == RUN_COLLECTOR_ARG)
    }
}

/// Lookup and termination of processes by pid.
pub trait ProcessTable: Send + Sync {
    fn lookup(&self, pid: u32) -> Option<ProcessInfo>;

    /// Sends SIGTERM. Returns false if the process no longer exists.
    fn terminate(&self, pid: u32) -> bool;
}

/// `ProcessTable` over the live system, via `sysinfo`.
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn lookup(&self, pid: u32) -> Option<ProcessInfo> {
        let mut system = System::new();
        let pid = Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| ProcessInfo {
            name: process.name().to_string(),
            cmd: process.cmd().to_vec(),
        })
    }

    fn terminate(&self, pid: u32) -> bool {
        let mut system = System::new();
        let pid = Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return false;
        }
        system
            .process(pid)
            .and_then(|process| process.kill_with(Signal::Term))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectorStatus {
    NotRunning,
    Running { pid: u32, name: String },
    /// The pidfile named no live collector and has been removed.
    Stale { pid: Option<u32> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: u32 },
    Stale { pid: Option<u32> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
}

pub struct CollectorControl<T: ProcessTable = SystemProcessTable> {
    pidfile: PidFile,
    table: T,
}

impl CollectorControl<SystemProcessTable> {
    pub fn new(pidfile: PidFile) -> Self {
        Self::with_table(pidfile, SystemProcessTable)
    }
}

impl<T: ProcessTable> CollectorControl<T> {
    pub fn with_table(pidfile: PidFile, table: T) -> Self {
        Self { pidfile, table }
    }

    pub fn pidfile(&self) -> &PidFile {
        &self.pidfile
    }

    /// Checks the pidfile against the process table, removing it when it is
    /// stale.
    pub fn status(&self) -> Result<CollectorStatus, ControlError> {
        let pid = match self.pidfile.read() {
            Ok(None) => return Ok(CollectorStatus::NotRunning),
            Ok(Some(pid)) => pid,
            Err(PidFileError::Malformed { content, .. }) => {
                debug!(?content, "Removing unreadable pidfile");
                self.pidfile.remove()?;
                return Ok(CollectorStatus::Stale { pid: None });
            }
            Err(e) => return Err(e.into()),
        };

        match self.table.lookup(pid) {
            Some(info) if info.is_collector() => Ok(CollectorStatus::Running {
                pid,
                name: info.name,
            }),
            other => {
                debug!(pid, found = other.is_some(), "Removing stale pidfile");
                self.pidfile.remove()?;
                Ok(CollectorStatus::Stale { pid: Some(pid) })
            }
        }
    }

    /// Sends SIGTERM to the running collector and removes its pidfile.
    ///
    /// No signal is sent unless the pidfile names a live collector.
    pub fn stop(&self) -> Result<StopOutcome, ControlError> {
        match self.status()? {
            CollectorStatus::NotRunning => Ok(StopOutcome::NotRunning),
            CollectorStatus::Stale { pid } => Ok(StopOutcome::Stale { pid }),
            CollectorStatus::Running { pid, .. } => {
                let signalled = self.table.terminate(pid);
                self.pidfile.remove()?;
                if signalled {
                    info!(pid, "Sent SIGTERM to collector");
                    Ok(StopOutcome::Stopped { pid })
                } else {
                    Ok(StopOutcome::Stale { pid: Some(pid) })
                }
            }
        }
    }

    /// Launches a collector unless one is already running.
    pub fn start<F>(&self, launch: F) -> Result<StartOutcome, ControlError>
    where
        F: FnOnce() -> io::Result<u32>,
    {
        if let CollectorStatus::Running { pid, .. } = self.status()? {
            return Ok(StartOutcome::AlreadyRunning { pid });
        }
        let pid = launch().map_err(ControlError::Launch)?;
        info!(pid, "Launched collector");
        Ok(StartOutcome::Started { pid })
    }
}

/// Spawns `<current exe> <args> run-collector` detached from the terminal, in
/// its own process group, with output appended to `log_file`.
pub fn launch_detached(log_file: &Path, args: &[OsString]) -> io::Result<u32> {
    let exe = std::env::current_exe()?;
    let log = OpenOptions::new().create(true).append(true).open(log_file)?;

    let mut command = Command::new(exe);
    command
        .args(args)
        .arg(RUN_COLLECTOR_ARG)
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn()?;
    Ok(child.id())
}
