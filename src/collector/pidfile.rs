//! The pidfile recording the running collector.
//!
//! Creation is not exclusive: two collectors started at the same moment can
//! both write the file, and the last writer wins. Readers treat a missing
//! file as "not running".

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PidFileError {
    #[error("Failed to access pidfile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Pidfile {path} does not contain a pid: {content:?}")]
    Malformed { path: PathBuf, content: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> PidFileError {
        PidFileError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Returns the recorded pid, or `None` when there is no pidfile.
    pub fn read(&self) -> Result<Option<u32>, PidFileError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        content
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| PidFileError::Malformed {
                path: self.path.clone(),
                content,
            })
    }

    pub fn write(&self, pid: u32) -> Result<(), PidFileError> {
        fs::write(&self.path, pid.to_string()).map_err(|e| self.io_error(e))
    }

    /// Deletes the pidfile. Returns false if it was already gone.
    pub fn remove(&self) -> Result<bool, PidFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Records `pid` and returns a guard that deletes the file when dropped.
    pub fn claim(&self, pid: u32) -> Result<PidFileGuard, PidFileError> {
        self.write(pid)?;
        debug!(path = %self.path.display(), pid, "Wrote pidfile");
        Ok(PidFileGuard {
            pidfile: self.clone(),
            pid,
        })
    }
}

/// Deletes the pidfile on drop, unless another process has since replaced it.
#[derive(Debug)]
pub struct PidFileGuard {
    pidfile: PidFile,
    pid: u32,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        match self.pidfile.read() {
            Ok(Some(pid)) if pid != self.pid => {
                debug!(owner = pid, "Pidfile now belongs to another collector, leaving it");
            }
            Ok(None) => {}
            _ => {
                if let Err(e) = self.pidfile.remove() {
                    warn!(error = %e, "Failed to remove pidfile");
                }
            }
        }
    }
}
