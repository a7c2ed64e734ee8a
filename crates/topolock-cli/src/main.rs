//! `topolock`: exercise queue locks against an in-process coordination store

mod commands;
mod logging;
mod shutdown;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, info};

use topolock_lock::LockConfig;
use topolock_store::MemoryStore;

use crate::logging::{LogRotation, LoggingConfig, init_logging};

const DEFAULT_DIR: &str = "keyspaces/commerce";

#[derive(Debug, Parser)]
#[command(name = "topolock", version, about = "Queue lock demos")]
struct Cli {
    /// Configuration file (yaml, toml or json); skipped when missing
    #[arg(short, long, env = "TOPOLOCK_CONFIG", default_value = "conf/topolock.yml")]
    config: PathBuf,

    /// Override the configured topology root
    #[arg(long)]
    root: Option<String>,

    /// Write rolling log files to this directory
    #[arg(long, env = "TOPOLOCK_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// How often rolling log files are rotated
    #[arg(long, value_enum, default_value_t = LogRotation::Daily)]
    log_rotation: LogRotation,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run several workers that take the same lock in turn
    Contend {
        #[arg(long, default_value = DEFAULT_DIR)]
        dir: String,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 3)]
        rounds: usize,
        #[arg(long, default_value_t = 100)]
        hold_ms: u64,
    },
    /// Show try-lock refusing while another session holds the lock
    TryLock {
        #[arg(long, default_value = DEFAULT_DIR)]
        dir: String,
    },
    /// Queue behind a holder; gives up on timeout or Ctrl+C
    Wait {
        #[arg(long, default_value = DEFAULT_DIR)]
        dir: String,
        #[arg(long, default_value_t = 5000)]
        hold_ms: u64,
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _logging_guard = init_logging(&LoggingConfig::from_args(
        cli.log_dir.clone(),
        cli.log_level,
        cli.log_rotation,
    ))?;

    let mut config = LockConfig::load(Some(&cli.config))?;
    if let Some(root) = cli.root {
        config = config.with_root(root);
    }
    info!(
        root = %config.root,
        cleanup_timeout = ?config.cleanup_timeout,
        poll_interval = ?config.poll_interval,
        "Lock configuration loaded"
    );

    let store = MemoryStore::new();
    match cli.command {
        Command::Contend {
            dir,
            workers,
            rounds,
            hold_ms,
        } => {
            commands::contend(
                &store,
                &config,
                &dir,
                workers,
                rounds,
                Duration::from_millis(hold_ms),
            )
            .await?;
        }
        Command::TryLock { dir } => {
            commands::try_lock(&store, &config, &dir).await?;
        }
        Command::Wait {
            dir,
            hold_ms,
            timeout_ms,
        } => {
            commands::wait(
                &store,
                &config,
                &dir,
                Duration::from_millis(hold_ms),
                Duration::from_millis(timeout_ms),
            )
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_options() {
        let cli = Cli::parse_from(["topolock", "try-lock"]);
        assert_eq!(cli.log_level, Level::INFO);
        assert_eq!(cli.log_rotation, LogRotation::Daily);

        let cli = Cli::parse_from([
            "topolock",
            "--log-level",
            "debug",
            "--log-rotation",
            "hourly",
            "try-lock",
        ]);
        assert_eq!(cli.log_level, Level::DEBUG);
        assert_eq!(cli.log_rotation, LogRotation::Hourly);
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        let err = Cli::try_parse_from(["topolock", "--log-level", "loud", "try-lock"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_parse_wait() {
        let cli = Cli::parse_from(["topolock", "--root", "/vitess/global", "wait", "--timeout-ms", "10"]);
        assert_eq!(cli.root.as_deref(), Some("/vitess/global"));
        match cli.command {
            Command::Wait {
                dir,
                hold_ms,
                timeout_ms,
            } => {
                assert_eq!(dir, DEFAULT_DIR);
                assert_eq!(hold_ms, 5000);
                assert_eq!(timeout_ms, 10);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
