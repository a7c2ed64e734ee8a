//! Lock configuration
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! YAML/TOML file, and `TOPOLOCK__*` environment variables
//! (e.g. `TOPOLOCK__LOCK__CLEANUP_TIMEOUT_MS=5000`).

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

pub const ROOT_PROPERTY: &str = "root";
pub const CLEANUP_TIMEOUT_PROPERTY: &str = "lock.cleanup_timeout_ms";
pub const POLL_INTERVAL_PROPERTY: &str = "lock.poll_interval_ms";

pub const ENV_PREFIX: &str = "TOPOLOCK";

pub const DEFAULT_ROOT: &str = "/";
/// Budget for deleting a failed entry and running diagnostics
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);
/// Re-rank interval for stores without removal watches
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Namespace root all lock directories are relative to
    pub root: String,
    pub cleanup_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl LockConfig {
    /// Load from an optional config file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(Self::from_config(&config))
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config
                .get_string(ROOT_PROPERTY)
                .unwrap_or(DEFAULT_ROOT.to_string()),
            cleanup_timeout: millis(config, CLEANUP_TIMEOUT_PROPERTY, DEFAULT_CLEANUP_TIMEOUT),
            poll_interval: millis(config, POLL_INTERVAL_PROPERTY, DEFAULT_POLL_INTERVAL),
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

// Non-positive values fall back to the default
fn millis(config: &Config, key: &str, default: Duration) -> Duration {
    config
        .get_int(key)
        .ok()
        .filter(|ms| *ms > 0)
        .map(|ms| Duration::from_millis(ms as u64))
        .unwrap_or(default)
}
