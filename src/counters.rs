//! # Host Counter Source
//!
//! This module defines `SysinfoCounters`, the production `CounterSource`.
//! It wraps a long-lived `sysinfo::System` and refreshes only the parts of it
//! that a tick needs: global CPU usage, memory, and per-process disk usage.
//!
//! Disk throughput is derived by summing the bytes every process read and
//! wrote since the previous refresh and dividing by the elapsed time.

use crate::core::{CounterSource, DiskRate};
use std::time::Instant;
use sysinfo::System;
use thiserror::Error;
use tracing::debug;

/// Bytes in one megabyte, as used for every MB figure in a `Reading`.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CounterError {
    #[error("{0} counter is not supported on this platform")]
    Unsupported(&'static str),

    #[error("{0} counter is unavailable: {1}")]
    Unavailable(&'static str, String),
}

/// A `CounterSource` backed by the `sysinfo` crate.
pub struct SysinfoCounters {
    system: System,
    last_disk_refresh: Instant,
}

impl SysinfoCounters {
    /// Creates a new source and primes the CPU and process counters, since
    /// both report deltas against the previous refresh.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_processes();
        debug!(
            supported = sysinfo::IS_SUPPORTED_SYSTEM,
            "Initialized sysinfo counters"
        );
        Self {
            system,
            last_disk_refresh: Instant::now(),
        }
    }

    fn ensure_supported(counter: &'static str) -> Result<(), CounterError> {
        if sysinfo::IS_SUPPORTED_SYSTEM {
            Ok(())
        } else {
            Err(CounterError::Unsupported(counter))
        }
    }
}

impl Default for SysinfoCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for SysinfoCounters {
    fn cpu_usage_percent(&mut self) -> Result<f64, CounterError> {
        Self::ensure_supported("cpu")?;
        self.system.refresh_cpu();
        Ok(self.system.global_cpu_info().cpu_usage() as f64)
    }

    fn available_memory_mb(&mut self) -> Result<f64, CounterError> {
        Self::ensure_supported("memory")?;
        self.system.refresh_memory();
        Ok(self.system.available_memory() as f64 / BYTES_PER_MB)
    }

    fn total_memory_mb(&mut self) -> Result<f64, CounterError> {
        Self::ensure_supported("memory")?;
        self.system.refresh_memory();
        match self.system.total_memory() {
            0 => Err(CounterError::Unavailable(
                "memory",
                "total physical memory reported as zero".to_string(),
            )),
            total => Ok(total as f64 / BYTES_PER_MB),
        }
    }

    fn disk_rate(&mut self) -> Result<DiskRate, CounterError> {
        Self::ensure_supported("disk")?;
        self.system.refresh_processes();
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_disk_refresh).as_secs_f64();
        self.last_disk_refresh = now;

        if elapsed <= 0.0 {
            return Ok(DiskRate::default());
        }

        let (read, written) = self
            .system
            .processes()
            .values()
            .map(|process| process.disk_usage())
            .fold((0u64, 0u64), |(read, written), usage| {
                (
                    read.saturating_add(usage.read_bytes),
                    written.saturating_add(usage.written_bytes),
                )
            });

        Ok(DiskRate {
            read_bytes_per_sec: read as f64 / elapsed,
            write_bytes_per_sec: written as f64 / elapsed,
        })
    }
}
