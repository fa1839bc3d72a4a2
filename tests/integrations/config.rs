//! Layered configuration: defaults, TOML file, environment, command line.

use clap::Parser;
use procmon::cli::Cli;
use procmon::config::Config;
use serial_test::serial;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 3] = [
    "PROCMON_COLLECTOR__PIDFILE",
    "PROCMON_RETRY__MAX_ATTEMPTS",
    "DATABASE_URL",
];

/// Clears the variables this suite touches, before and after each test.
struct EnvGuard;

impl EnvGuard {
    fn new() -> Self {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
        EnvGuard
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }
}

fn config_file(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml).unwrap();
    file
}

fn load(path: &Path, extra: &[&str]) -> anyhow::Result<Config> {
    let mut args = vec!["procmon".to_string(), "-c".to_string(), path.display().to_string()];
    args.extend(extra.iter().map(|s| s.to_string()));
    args.push("status-collector".to_string());
    Config::load(&Cli::parse_from(args))
}

#[test]
#[serial]
fn test_file_values_are_loaded() {
    let _env = EnvGuard::new();
    let file = config_file(
        r#"
        [database]
        url = "postgresql://file@db/procmon"
        [retry]
        max_attempts = 2
        delay_seconds = 1
        "#,
    );

    let config = load(file.path(), &[]).unwrap();

    assert_eq!(config.database.url, "postgresql://file@db/procmon");
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.collector.interval_seconds, 5);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let _env = EnvGuard::new();
    let file = config_file("[retry]\nmax_attempts = 2\n");
    std::env::set_var("PROCMON_RETRY__MAX_ATTEMPTS", "9");
    std::env::set_var("PROCMON_COLLECTOR__PIDFILE", "/run/procmon/test.pid");
    std::env::set_var("DATABASE_URL", "postgresql://env@db/procmon");

    let config = load(file.path(), &[]).unwrap();

    assert_eq!(config.retry.max_attempts, 9);
    assert_eq!(config.collector.pidfile, PathBuf::from("/run/procmon/test.pid"));
    assert_eq!(config.database.url, "postgresql://env@db/procmon");
}

#[test]
#[serial]
fn test_command_line_overrides_environment() {
    let _env = EnvGuard::new();
    let file = config_file("log_level = \"warn\"\n");
    std::env::set_var("DATABASE_URL", "postgresql://env@db/procmon");

    let config = load(
        file.path(),
        &["--database-url", "postgresql://cli@db/procmon", "--log-level", "trace"],
    )
    .unwrap();

    assert_eq!(config.database.url, "postgresql://cli@db/procmon");
    assert_eq!(config.log_level, "trace");
}

#[test]
#[serial]
fn test_missing_explicit_config_file_is_an_error() {
    let _env = EnvGuard::new();
    let err = load(Path::new("/nonexistent/procmon.toml"), &[]).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}
