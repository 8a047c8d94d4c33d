//! The metrics collector: one sampling tick in, one `Reading` out.
//!
//! `sample` never fails. Each sub-read is isolated, so a broken counter only
//! zeroes the fields it feeds; the fault is reported through `tracing` and the
//! `collector_source_failures_total` counter.

use crate::{
    config::GpuConfig,
    core::{CounterSource, GpuVendor, Reading},
    counters::{CounterError, SysinfoCounters, BYTES_PER_MB},
    gpu::GpuProbe,
};
use chrono::{DateTime, Local};
use tracing::{debug, warn};

/// Produces readings from a counter source and a GPU probe.
pub struct MetricsCollector {
    counters: Box<dyn CounterSource>,
    gpu: GpuProbe,
    total_memory_mb: Option<f64>,
    last_timestamp: Option<DateTime<Local>>,
}

/// Clamps a percentage into `[0, 100]`, mapping NaN to zero.
fn percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Maps negative and non-finite values to zero.
fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn record_failure(source: &'static str, error: &CounterError) {
    warn!(source, error = %error, "Counter read failed, reporting zero");
    metrics::counter!("collector_source_failures_total", "source" => source).increment(1);
}

impl MetricsCollector {
    pub fn new(counters: impl CounterSource + 'static, gpu: GpuProbe) -> Self {
        Self {
            counters: Box::new(counters),
            gpu,
            total_memory_mb: None,
            last_timestamp: None,
        }
    }

    /// Creates the production collector backed by `sysinfo` and the
    /// configured GPU tiers.
    pub fn from_config(config: &GpuConfig) -> Self {
        Self::new(SysinfoCounters::new(), GpuProbe::from_config(config))
    }

    pub fn gpu_vendor(&self) -> GpuVendor {
        self.gpu.vendor()
    }

    /// Total physical memory, read once and cached after the first success.
    fn total_memory_mb(&mut self) -> Option<f64> {
        if self.total_memory_mb.is_none() {
            match self.counters.total_memory_mb() {
                Ok(total) if total > 0.0 && total.is_finite() => {
                    debug!(total_mb = total, "Cached total physical memory");
                    self.total_memory_mb = Some(total);
                }
                Ok(total) => record_failure(
                    "memory_total",
                    &CounterError::Unavailable("memory", format!("invalid total {}", total)),
                ),
                Err(e) => record_failure("memory_total", &e),
            }
        }
        self.total_memory_mb
    }

    /// The capture instant, never earlier than the previous reading's.
    fn next_timestamp(&mut self) -> DateTime<Local> {
        let now = Local::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Samples every source once and assembles a fully populated reading.
    pub async fn sample(&mut self) -> Reading {
        let mut reading = Reading::zeroed(self.next_timestamp(), self.gpu.vendor());

        match self.counters.cpu_usage_percent() {
            Ok(cpu) => reading.cpu_usage_percent = percent(cpu),
            Err(e) => record_failure("cpu", &e),
        }

        let total = self.total_memory_mb();
        reading.memory_total_mb = total.unwrap_or(0.0);
        match self.counters.available_memory_mb() {
            Ok(available) => {
                if let Some(total) = total {
                    let used = non_negative(total - non_negative(available));
                    reading.memory_used_mb = used;
                    reading.memory_usage_percent = percent(used / total * 100.0);
                }
            }
            Err(e) => record_failure("memory_available", &e),
        }

        match self.counters.disk_rate() {
            Ok(rate) => {
                reading.disk_read_mbps = non_negative(rate.read_bytes_per_sec) / BYTES_PER_MB;
                reading.disk_write_mbps = non_negative(rate.write_bytes_per_sec) / BYTES_PER_MB;
            }
            Err(e) => record_failure("disk", &e),
        }

        let gpu = self.gpu.usage().await;
        reading.gpu_usage_percent = gpu.usage_percent;
        reading.gpu_memory_used_mb = gpu.memory_used_mb;

        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeCounterSource, FakeGpuStrategy};

    fn nvidia_probe() -> GpuProbe {
        GpuProbe::new(
            GpuVendor::Nvidia,
            vec![Box::new(FakeGpuStrategy::succeeding("nvidia-smi", 37.5, 2048.0))],
        )
    }

    #[tokio::test]
    async fn test_full_reading() {
        let counters = FakeCounterSource::new();
        let mut collector = MetricsCollector::new(counters, nvidia_probe());

        let reading = collector.sample().await;
        assert_eq!(reading.cpu_usage_percent, 25.0);
        assert_eq!(reading.memory_total_mb, 8192.0);
        assert_eq!(reading.memory_used_mb, 4096.0);
        assert_eq!(reading.memory_usage_percent, 50.0);
        assert_eq!(reading.disk_read_mbps, 2.0);
        assert_eq!(reading.disk_write_mbps, 0.5);
        assert_eq!(reading.gpu_vendor, GpuVendor::Nvidia);
        assert_eq!(reading.gpu_usage_percent, 37.5);
        assert_eq!(reading.gpu_memory_used_mb, 2048.0);
    }

    #[tokio::test]
    async fn test_total_memory_is_cached() {
        let counters = FakeCounterSource::new();
        let mut collector = MetricsCollector::new(counters.clone(), nvidia_probe());

        collector.sample().await;
        collector.sample().await;
        collector.sample().await;
        assert_eq!(counters.state().total_memory_reads, 1);
    }

    #[tokio::test]
    async fn test_unavailable_total_is_retried_until_known() {
        let counters = FakeCounterSource::new();
        counters.update(|s| s.fail_total_memory = true);
        let mut collector = MetricsCollector::new(counters.clone(), nvidia_probe());

        let reading = collector.sample().await;
        assert_eq!(reading.memory_total_mb, 0.0);
        assert_eq!(reading.memory_used_mb, 0.0);
        assert_eq!(reading.memory_usage_percent, 0.0);
        assert_eq!(reading.cpu_usage_percent, 25.0);

        counters.update(|s| s.fail_total_memory = false);
        let reading = collector.sample().await;
        assert_eq!(reading.memory_usage_percent, 50.0);
        assert_eq!(counters.state().total_memory_reads, 2);
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let mut collector = MetricsCollector::new(FakeCounterSource::new(), nvidia_probe());
        let future = Local::now() + chrono::Duration::hours(1);
        collector.last_timestamp = Some(future);

        let reading = collector.sample().await;
        assert_eq!(reading.timestamp, future);
    }

    #[test]
    fn test_value_sanitizing() {
        assert_eq!(percent(f64::NAN), 0.0);
        assert_eq!(percent(-3.0), 0.0);
        assert_eq!(percent(101.0), 100.0);
        assert_eq!(non_negative(f64::INFINITY), 0.0);
        assert_eq!(non_negative(-1.0), 0.0);
        assert_eq!(non_negative(2.5), 2.5);
    }
}
