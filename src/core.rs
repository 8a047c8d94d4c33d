//! Core domain types and service traits for HostWatch
//!
//! This module defines the fundamental data structures and trait contracts
//! that govern component interactions throughout the sampling engine.

use crate::counters::CounterError;
use crate::gpu::GpuError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One immutable sample of every tracked host metric.
///
/// A reading is always fully populated: a source that could not be read
/// contributes `0.0` rather than an absent value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Local wall-clock capture instant
    pub timestamp: DateTime<Local>,
    /// Busy CPU time across all cores, 0-100
    pub cpu_usage_percent: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub memory_usage_percent: f64,
    /// Vendor detected at startup
    pub gpu_vendor: GpuVendor,
    /// Best-effort GPU utilization, 0-100
    pub gpu_usage_percent: f64,
    /// Only populated by the vendor-tool tier
    pub gpu_memory_used_mb: f64,
    pub disk_read_mbps: f64,
    pub disk_write_mbps: f64,
}

impl Reading {
    /// Creates a reading where every metric is zero.
    pub fn zeroed(timestamp: DateTime<Local>, gpu_vendor: GpuVendor) -> Self {
        Self {
            timestamp,
            cpu_usage_percent: 0.0,
            memory_used_mb: 0.0,
            memory_total_mb: 0.0,
            memory_usage_percent: 0.0,
            gpu_vendor,
            gpu_usage_percent: 0.0,
            gpu_memory_used_mb: 0.0,
            disk_read_mbps: 0.0,
            disk_write_mbps: 0.0,
        }
    }
}

/// The GPU vendor detected for the process lifetime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    #[default]
    Unknown,
}

impl GpuVendor {
    /// Classifies a single display adapter name.
    ///
    /// Matching is case-insensitive and checks `NVIDIA`, then `AMD`/`RADEON`,
    /// then `INTEL`.
    pub fn from_adapter_name(name: &str) -> Option<Self> {
        let name = name.to_uppercase();
        if name.contains("NVIDIA") {
            Some(Self::Nvidia)
        } else if name.contains("AMD") || name.contains("RADEON") {
            Some(Self::Amd)
        } else if name.contains("INTEL") {
            Some(Self::Intel)
        } else {
            None
        }
    }

    /// Returns the vendor of the first adapter that matches any known vendor.
    pub fn from_adapter_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .find_map(|name| Self::from_adapter_name(name.as_ref()))
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Nvidia => "NVIDIA",
            Self::Amd => "AMD",
            Self::Intel => "Intel",
            Self::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// GPU figures returned by a single utilization tier.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuUsage {
    pub usage_percent: f64,
    pub memory_used_mb: f64,
}

/// Disk throughput since the previous refresh, in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskRate {
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Instantaneous host counters polled once per tick.
///
/// Each method is independent: a failure in one must not prevent the others
/// from being read.
pub trait CounterSource: Send {
    /// Busy CPU percentage across all cores.
    fn cpu_usage_percent(&mut self) -> Result<f64, CounterError>;

    /// Physical memory currently available to new allocations, in MB.
    fn available_memory_mb(&mut self) -> Result<f64, CounterError>;

    /// Total installed physical memory, in MB.
    fn total_memory_mb(&mut self) -> Result<f64, CounterError>;

    /// Disk read/write throughput since the previous call.
    fn disk_rate(&mut self) -> Result<DiskRate, CounterError>;
}

/// Lists the display adapters installed on the host.
pub trait AdapterEnumerator: Send + Sync {
    /// Returns a human readable name for every display adapter.
    fn adapter_names(&self) -> Result<Vec<String>, GpuError>;
}

/// An OS facility exposing per-engine GPU utilization.
pub trait EngineCounterSource: Send + Sync {
    /// Returns the utilization percentage of every engine that reports one.
    fn engine_utilization(&self) -> Result<Vec<f64>, GpuError>;
}

/// One tier of the GPU utilization fallback chain.
#[async_trait]
pub trait GpuUsageStrategy: Send + Sync {
    /// A short, descriptive name used for logging and metrics.
    fn name(&self) -> &'static str;

    /// Attempts to read GPU utilization.
    ///
    /// # Returns
    /// * `Ok(GpuUsage)` when this tier produced a value
    /// * `Err` when the caller should fall through to the next tier
    async fn try_usage(&self) -> Result<GpuUsage, GpuError>;
}
