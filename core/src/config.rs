//! Configuration loading
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. Config file (`CADENCE_CONFIG_PATH`, or `cadence.toml` in the working directory)
//! 3. Environment variables (`CADENCE__POOL__MAX_IDLE=128`, `CADENCE__DISPATCH__SEND_TIMEOUT_MS=2000`)
//!
//! A `.env` file is read first so its values act as environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "CADENCE_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "cadence";
const ENV_PREFIX: &str = "CADENCE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle instances kept for reuse; extra returned instances are dropped
    pub max_idle: usize,
    /// Instances built eagerly when the runtime starts
    pub prewarm: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 64,
            prewarm: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on a single remote send before falling back to local execution
    pub send_timeout_ms: u64,
    /// Sends allowed to run at once; timed-out sends count until they finish
    pub max_in_flight: usize,
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 5000,
            max_in_flight: crate::dispatch::DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(file.as_deref())
    }

    /// Load with an explicit config file (required when given)
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let file_source = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pool.max_idle, 64);
        assert_eq!(config.pool.prewarm, 0);
        assert_eq!(config.dispatch.send_timeout(), Duration::from_secs(5));
        assert_eq!(config.dispatch.max_in_flight, 32);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[pool]\nmax_idle = 8\n\n[dispatch]\nsend_timeout_ms = 250\nmax_in_flight = 4").unwrap();

        let config = Config::load_from(file.path().to_str()).unwrap();

        assert_eq!(config.pool.max_idle, 8);
        assert_eq!(config.pool.prewarm, 0);
        assert_eq!(config.dispatch.send_timeout_ms, 250);
        assert_eq!(config.dispatch.max_in_flight, 4);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load_from(Some("/nonexistent/cadence-config.toml"));
        assert!(result.is_err());
    }
}
