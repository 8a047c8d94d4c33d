//! NVIDIA utilization via the `nvidia-smi` command-line tool.
//!
//! A single invocation returns both utilization and memory used, so this is
//! the preferred tier on NVIDIA hosts.

use super::GpuError;
use crate::core::{GpuUsage, GpuUsageStrategy};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::trace;

const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=utilization.gpu,memory.used",
    "--format=csv,noheader,nounits",
];

/// Runs `nvidia-smi` with a bounded wait and parses its CSV output.
#[derive(Debug, Clone)]
pub struct NvidiaSmiStrategy {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl NvidiaSmiStrategy {
    /// Creates a strategy that queries `program` with the standard arguments.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: QUERY_ARGS.iter().map(|arg| arg.to_string()).collect(),
            timeout,
        }
    }

    /// Replaces the arguments passed to the tool.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    async fn run(&self) -> Result<String, GpuError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GpuError::Spawn {
                tool: self.program.clone(),
                source,
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(GpuError::Spawn {
                    tool: self.program.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(GpuError::Timeout {
                    tool: self.program.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        if !output.status.success() {
            return Err(GpuError::NonZeroExit {
                tool: self.program.clone(),
                status: output.status,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl GpuUsageStrategy for NvidiaSmiStrategy {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    async fn try_usage(&self) -> Result<GpuUsage, GpuError> {
        let output = self.run().await?;
        trace!(output = %output.trim(), "nvidia-smi output");
        parse_query_output(&output)
    }
}

/// Parses `<utilization>, <memory used>` from the first non-empty line.
///
/// Multi-GPU hosts print one line per device; the first device is reported.
pub fn parse_query_output(output: &str) -> Result<GpuUsage, GpuError> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| GpuError::Parse(output.to_string()))?;

    let mut fields = line.split(',').map(str::trim);
    let mut next_number = || -> Result<f64, GpuError> {
        fields
            .next()
            .and_then(|field| field.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .ok_or_else(|| GpuError::Parse(line.to_string()))
    };

    let usage_percent = next_number()?;
    let memory_used_mb = next_number()?;
    Ok(GpuUsage {
        usage_percent,
        memory_used_mb,
    })
}
