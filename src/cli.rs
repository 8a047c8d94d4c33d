//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the `hostwatch.toml` file and environment variables.

use clap::Parser;
use figment::{
    providers::Serialized,
    value::{Dict, Map},
    Error, Metadata, Profile, Provider,
};
use serde::Serialize;
use std::path::PathBuf;

/// Samples host CPU, memory, disk and GPU utilization into a per-session CSV log.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Milliseconds between samples.
    #[arg(short, long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Number of readings kept in the in-memory history.
    #[arg(long, value_name = "COUNT")]
    pub history_capacity: Option<usize>,

    /// Directory that receives the session log files.
    #[arg(short, long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Print readings as JSON instead of plain text.
    #[arg(long)]
    pub json: bool,

    /// Periodically log internal diagnostic metrics.
    #[arg(long)]
    pub log_metrics: bool,

    /// Stop the session after this many seconds instead of waiting for Ctrl-C.
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<u64>,
}

/// The subset of `Config` that command-line flags can override. Unset
/// options are skipped so they never mask lower layers.
#[derive(Serialize, Default)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,
    sampling: SamplingOverrides,
    logging: LoggingOverrides,
    metrics: MetricsOverrides,
    output: OutputOverrides,
}

#[derive(Serialize, Default)]
struct SamplingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    history_capacity: Option<usize>,
}

#[derive(Serialize, Default)]
struct LoggingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    directory: Option<PathBuf>,
}

#[derive(Serialize, Default)]
struct MetricsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    log_metrics: Option<bool>,
}

#[derive(Serialize, Default)]
struct OutputOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<crate::config::OutputFormat>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            log_level: self.log_level.clone(),
            sampling: SamplingOverrides {
                interval_ms: self.interval_ms,
                history_capacity: self.history_capacity,
            },
            logging: LoggingOverrides {
                directory: self.log_dir.clone(),
            },
            // Boolean flags only override when present.
            metrics: MetricsOverrides {
                log_metrics: self.log_metrics.then_some(true),
            },
            output: OutputOverrides {
                format: self.json.then_some(crate::config::OutputFormat::Json),
            },
        }
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Serialized::defaults(self.overrides()).data()
    }
}
