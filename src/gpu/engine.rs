//! Vendor-independent GPU utilization from per-engine OS counters.

use super::GpuError;
use crate::core::{EngineCounterSource, GpuUsage, GpuUsageStrategy};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Averages the utilization of every engine reported by an
/// `EngineCounterSource`. Memory usage is not available on this path.
pub struct EngineCounterStrategy {
    source: Box<dyn EngineCounterSource>,
}

impl EngineCounterStrategy {
    pub fn new(source: impl EngineCounterSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }
}

#[async_trait]
impl GpuUsageStrategy for EngineCounterStrategy {
    fn name(&self) -> &'static str {
        "engine-counters"
    }

    async fn try_usage(&self) -> Result<GpuUsage, GpuError> {
        let engines = self.source.engine_utilization()?;
        let usage_percent = if engines.is_empty() {
            0.0
        } else {
            engines.iter().sum::<f64>() / engines.len() as f64
        };
        Ok(GpuUsage {
            usage_percent,
            memory_used_mb: 0.0,
        })
    }
}

/// Reads `gpu_busy_percent` from every DRM card under a sysfs root
/// (normally `/sys/class/drm`).
///
/// Only amdgpu exposes that file. Cards driven by i915 or xe are present but
/// silent, so Intel hosts report 0% through this source.
#[derive(Debug, Clone)]
pub struct DrmEngineCounters {
    root: PathBuf,
}

impl DrmEngineCounters {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

/// `card0` is a card, `card0-DP-1` is one of its connectors.
fn is_card_entry(name: &str) -> bool {
    name.strip_prefix("card")
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

impl EngineCounterSource for DrmEngineCounters {
    fn engine_utilization(&self) -> Result<Vec<f64>, GpuError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            GpuError::EngineCounters(format!("{}: {}", self.root.display(), e))
        })?;

        let mut cards: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_str().is_some_and(is_card_entry))
            .map(|entry| entry.path())
            .collect();
        cards.sort();

        let card_count = cards.len();
        let mut values = Vec::with_capacity(card_count);
        for card in cards {
            let path = card.join("device").join("gpu_busy_percent");
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            match raw.trim().parse::<f64>() {
                Ok(value) => values.push(value),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable engine counter"),
            }
        }
        if values.is_empty() && card_count > 0 {
            debug!(
                cards = card_count,
                root = %self.root.display(),
                "No DRM card reports gpu_busy_percent, GPU usage reads as 0"
            );
        }
        Ok(values)
    }
}
