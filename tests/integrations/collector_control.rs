//! Integration tests for collector lifecycle commands against the real
//! process table.

use procmon::app::{status_collector, stop_collector};
use procmon::collector::pidfile::PidFile;
use procmon::collector::{CollectorControl, CollectorStatus, StartOutcome, StopOutcome};
use std::process::Command;
use tempfile::tempdir;

/// A pid that belonged to a process which has already exited.
fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

fn render<F>(f: F) -> String
where
    F: FnOnce(&mut Vec<u8>) -> anyhow::Result<()>,
{
    let mut out = Vec::new();
    f(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_missing_pidfile_means_not_running() {
    let dir = tempdir().unwrap();
    let control = CollectorControl::new(PidFile::new(dir.path().join("collector.pid")));

    assert_eq!(control.status().unwrap(), CollectorStatus::NotRunning);
    assert_eq!(control.stop().unwrap(), StopOutcome::NotRunning);
    assert_eq!(
        render(|out| stop_collector(&control, out)),
        "Collector is not running.\n"
    );
}

#[test]
fn test_dead_pid_is_reclaimed() {
    let dir = tempdir().unwrap();
    let pidfile = PidFile::new(dir.path().join("collector.pid"));
    let pid = dead_pid();
    pidfile.write(pid).unwrap();
    let control = CollectorControl::new(pidfile.clone());

    let output = render(|out| status_collector(&control, out));

    assert_eq!(
        output,
        format!("Collector is not running (removed stale pidfile for PID {}).\n", pid)
    );
    assert_eq!(pidfile.read().unwrap(), None);
}

#[test]
fn test_unrelated_live_process_is_not_signalled() {
    let dir = tempdir().unwrap();
    let pidfile = PidFile::new(dir.path().join("collector.pid"));
    // This test binary is alive but is not a collector.
    let own_pid = std::process::id();
    pidfile.write(own_pid).unwrap();
    let control = CollectorControl::new(pidfile.clone());

    assert_eq!(
        control.stop().unwrap(),
        StopOutcome::Stale { pid: Some(own_pid) }
    );
    assert!(!pidfile.path().exists());
}

#[test]
fn test_start_launches_when_not_running() {
    let dir = tempdir().unwrap();
    let pidfile = PidFile::new(dir.path().join("collector.pid"));
    pidfile.write(dead_pid()).unwrap();
    let control = CollectorControl::new(pidfile.clone());

    let outcome = control.start(|| Ok(4242)).unwrap();

    assert_eq!(outcome, StartOutcome::Started { pid: 4242 });
    assert!(!pidfile.path().exists());
}

#[test]
fn test_launch_failure_is_reported() {
    let dir = tempdir().unwrap();
    let control = CollectorControl::new(PidFile::new(dir.path().join("collector.pid")));

    let result = control.start(|| Err(std::io::Error::other("no such binary")));

    assert!(result.is_err());
}
