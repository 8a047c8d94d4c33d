//! Configuration management for HostWatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer defaults, a `hostwatch.toml` file, environment variables
//! and command-line arguments.

use crate::cli::Cli;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The configuration file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "hostwatch.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Sampling cadence and history size.
    pub sampling: SamplingConfig,
    /// Where session logs are written.
    pub logging: LoggingConfig,
    /// GPU detection and vendor-tool settings.
    pub gpu: GpuConfig,
    /// Internal diagnostics.
    pub metrics: MetricsConfig,
    /// How live readings are printed by the binary.
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Milliseconds between ticks. Must be greater than zero.
    pub interval_ms: u64,
    /// Number of readings kept for charting. Must be greater than zero.
    pub history_capacity: usize,
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Directory that receives one CSV file per session.
    pub directory: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GpuConfig {
    /// Program invoked for NVIDIA utilization.
    pub tool_path: String,
    /// Upper bound on a single vendor-tool invocation.
    pub tool_timeout_ms: u64,
    /// sysfs directory holding DRM cards.
    pub drm_root: PathBuf,
    /// sysfs directory holding PCI devices.
    pub pci_root: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Periodically log internal diagnostic metrics.
    pub log_metrics: bool,
    /// Seconds between diagnostic metric dumps.
    pub log_aggregation_seconds: u64,
}

/// The format for live readings printed to stdout.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    PlainText,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::PlainText => f.write_str("plain text"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

/// A rejected configuration value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sampling.interval_ms must be greater than zero")]
    ZeroInterval,

    #[error("sampling.history_capacity must be greater than zero")]
    ZeroHistoryCapacity,

    #[error("gpu.tool_timeout_ms must be greater than zero")]
    ZeroToolTimeout,

    #[error("logging.directory must not be empty")]
    EmptyLogDirectory,
}

impl Config {
    /// Loads the configuration, layering defaults, the TOML file, the
    /// environment and the command line, then validates the result.
    ///
    /// Environment variables use the `HOSTWATCH_` prefix and `__` to reach
    /// nested keys, e.g. `HOSTWATCH_SAMPLING__INTERVAL_MS=500`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("HOSTWATCH_").split("__"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that would otherwise stop a session from starting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.sampling.history_capacity == 0 {
            return Err(ConfigError::ZeroHistoryCapacity);
        }
        if self.gpu.tool_timeout_ms == 0 {
            return Err(ConfigError::ZeroToolTimeout);
        }
        if self.logging.directory.as_os_str().is_empty() {
            return Err(ConfigError::EmptyLogDirectory);
        }
        Ok(())
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            sampling: SamplingConfig {
                interval_ms: 1000,
                history_capacity: crate::history::DEFAULT_HISTORY_CAPACITY,
            },
            logging: LoggingConfig {
                directory: PathBuf::from("logs"),
            },
            gpu: GpuConfig {
                tool_path: "nvidia-smi".to_string(),
                tool_timeout_ms: 3000,
                drm_root: PathBuf::from("/sys/class/drm"),
                pci_root: PathBuf::from("/sys/bus/pci/devices"),
            },
            metrics: MetricsConfig {
                log_metrics: false,
                log_aggregation_seconds: 60,
            },
            output: OutputConfig {
                format: OutputFormat::PlainText,
            },
        }
    }
}
