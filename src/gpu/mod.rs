//! GPU vendor detection and the tiered utilization fallback chain.
//!
//! The probe detects the installed vendor once and then, on every tick,
//! walks an ordered list of `GpuUsageStrategy` tiers until one succeeds.
//! A failing tier is logged and counted but never propagated.

pub mod adapters;
pub mod engine;
pub mod nvidia_smi;

pub use adapters::PciAdapterEnumerator;
pub use engine::{DrmEngineCounters, EngineCounterStrategy};
pub use nvidia_smi::NvidiaSmiStrategy;

use crate::config::GpuConfig;
use crate::core::{AdapterEnumerator, GpuUsage, GpuUsageStrategy, GpuVendor};
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("failed to launch `{tool}`: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("`{tool}` timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("`{tool}` exited with {status}")]
    NonZeroExit { tool: String, status: ExitStatus },

    #[error("unparsable tool output: {0:?}")]
    Parse(String),

    #[error("display adapter enumeration unavailable: {0}")]
    Enumeration(String),

    #[error("GPU engine counters unavailable: {0}")]
    EngineCounters(String),
}

/// Detects the GPU vendor from the adapters reported by `enumerator`.
///
/// Enumeration failure is not fatal and yields `GpuVendor::Unknown`.
pub fn detect_vendor(enumerator: &dyn AdapterEnumerator) -> GpuVendor {
    match enumerator.adapter_names() {
        Ok(names) => {
            debug!(adapters = ?names, "Enumerated display adapters");
            let vendor = GpuVendor::from_adapter_names(&names);
            info!(%vendor, "Detected GPU vendor");
            vendor
        }
        Err(e) => {
            warn!(error = %e, "GPU detection failed, assuming unknown vendor");
            GpuVendor::Unknown
        }
    }
}

/// Builds the ordered fallback chain for a vendor.
///
/// NVIDIA hosts try the vendor tool first and fall back to the generic engine
/// counters; AMD and Intel hosts only have the generic tier; an unknown vendor
/// has no tiers and always reports zero.
pub fn tiers_for_vendor(
    vendor: GpuVendor,
    vendor_tool: Box<dyn GpuUsageStrategy>,
    engine_counters: Box<dyn GpuUsageStrategy>,
) -> Vec<Box<dyn GpuUsageStrategy>> {
    match vendor {
        GpuVendor::Nvidia => vec![vendor_tool, engine_counters],
        GpuVendor::Amd | GpuVendor::Intel => vec![engine_counters],
        GpuVendor::Unknown => Vec::new(),
    }
}

/// Reports GPU utilization through a vendor-specific chain of tiers.
pub struct GpuProbe {
    vendor: GpuVendor,
    tiers: Vec<Box<dyn GpuUsageStrategy>>,
}

impl GpuProbe {
    /// Creates a probe with an explicit vendor and tier list.
    pub fn new(vendor: GpuVendor, tiers: Vec<Box<dyn GpuUsageStrategy>>) -> Self {
        Self { vendor, tiers }
    }

    /// Runs vendor detection and builds the matching fallback chain.
    pub fn detect(
        enumerator: &dyn AdapterEnumerator,
        vendor_tool: Box<dyn GpuUsageStrategy>,
        engine_counters: Box<dyn GpuUsageStrategy>,
    ) -> Self {
        let vendor = detect_vendor(enumerator);
        Self::new(vendor, tiers_for_vendor(vendor, vendor_tool, engine_counters))
    }

    /// Creates the production probe: PCI enumeration, `nvidia-smi`, and DRM
    /// engine counters, all located according to `config`.
    pub fn from_config(config: &GpuConfig) -> Self {
        let enumerator = PciAdapterEnumerator::new(&config.pci_root);
        let vendor_tool = NvidiaSmiStrategy::new(
            config.tool_path.clone(),
            Duration::from_millis(config.tool_timeout_ms),
        );
        let engine_counters = EngineCounterStrategy::new(DrmEngineCounters::new(&config.drm_root));
        Self::detect(&enumerator, Box::new(vendor_tool), Box::new(engine_counters))
    }

    pub fn vendor(&self) -> GpuVendor {
        self.vendor
    }

    /// Names of the configured tiers, in priority order.
    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }

    /// Returns the figures of the first tier that succeeds, or zeroes when
    /// every tier fails.
    pub async fn usage(&self) -> GpuUsage {
        for tier in &self.tiers {
            match tier.try_usage().await {
                Ok(usage) => {
                    return GpuUsage {
                        usage_percent: usage.usage_percent.clamp(0.0, 100.0),
                        memory_used_mb: usage.memory_used_mb.max(0.0),
                    };
                }
                Err(e) => {
                    debug!(tier = tier.name(), error = %e, "GPU tier failed, falling back");
                    metrics::counter!("gpu_tier_failures_total", "tier" => tier.name())
                        .increment(1);
                }
            }
        }
        GpuUsage::default()
    }
}
