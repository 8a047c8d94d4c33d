//! Fakes for the collector's and the session log's collaborators.
//!
//! Each fake is cheap to clone and shares its state, so a test can keep a
//! handle after moving the fake into a `MetricsCollector`, `GpuProbe` or
//! `SessionLogger`.

use crate::{
    core::{
        AdapterEnumerator, CounterSource, DiskRate, EngineCounterSource, GpuUsage,
        GpuUsageStrategy, GpuVendor, Reading,
    },
    counters::CounterError,
    gpu::GpuError,
    session_log::LogSink,
};
use async_trait::async_trait;
use chrono::{Local, TimeZone};
use std::io;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

/// Values and failure switches for a `FakeCounterSource`.
#[derive(Debug, Clone)]
pub struct FakeCounterState {
    pub cpu_percent: f64,
    pub available_memory_mb: f64,
    pub total_memory_mb: f64,
    pub disk: DiskRate,
    pub fail_cpu: bool,
    pub fail_available_memory: bool,
    pub fail_total_memory: bool,
    pub fail_disk: bool,
    pub total_memory_reads: u64,
}

impl Default for FakeCounterState {
    fn default() -> Self {
        Self {
            cpu_percent: 25.0,
            available_memory_mb: 4096.0,
            total_memory_mb: 8192.0,
            disk: DiskRate {
                read_bytes_per_sec: 2.0 * 1024.0 * 1024.0,
                write_bytes_per_sec: 512.0 * 1024.0,
            },
            fail_cpu: false,
            fail_available_memory: false,
            fail_total_memory: false,
            fail_disk: false,
            total_memory_reads: 0,
        }
    }
}

/// A scriptable `CounterSource`.
#[derive(Debug, Clone, Default)]
pub struct FakeCounterSource {
    state: Arc<Mutex<FakeCounterState>>,
}

impl FakeCounterSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutates the shared state.
    pub fn update(&self, f: impl FnOnce(&mut FakeCounterState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn state(&self) -> FakeCounterState {
        self.state.lock().unwrap().clone()
    }

    fn read<T>(
        &self,
        counter: &'static str,
        failing: impl Fn(&FakeCounterState) -> bool,
        value: impl Fn(&FakeCounterState) -> T,
    ) -> Result<T, CounterError> {
        let state = self.state.lock().unwrap();
        if failing(&state) {
            Err(CounterError::Unavailable(counter, "simulated failure".to_string()))
        } else {
            Ok(value(&state))
        }
    }
}

impl CounterSource for FakeCounterSource {
    fn cpu_usage_percent(&mut self) -> Result<f64, CounterError> {
        self.read("cpu", |s| s.fail_cpu, |s| s.cpu_percent)
    }

    fn available_memory_mb(&mut self) -> Result<f64, CounterError> {
        self.read("memory", |s| s.fail_available_memory, |s| s.available_memory_mb)
    }

    fn total_memory_mb(&mut self) -> Result<f64, CounterError> {
        self.state.lock().unwrap().total_memory_reads += 1;
        self.read("memory", |s| s.fail_total_memory, |s| s.total_memory_mb)
    }

    fn disk_rate(&mut self) -> Result<DiskRate, CounterError> {
        self.read("disk", |s| s.fail_disk, |s| s.disk)
    }
}

/// Counts how many times a fake was invoked.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU64>);

impl CallCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A GPU tier that either always succeeds with fixed figures or always fails.
#[derive(Debug, Clone)]
pub struct FakeGpuStrategy {
    name: &'static str,
    result: Option<GpuUsage>,
    calls: CallCounter,
}

impl FakeGpuStrategy {
    pub fn succeeding(name: &'static str, usage_percent: f64, memory_used_mb: f64) -> Self {
        Self {
            name,
            result: Some(GpuUsage {
                usage_percent,
                memory_used_mb,
            }),
            calls: CallCounter::default(),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            name,
            result: None,
            calls: CallCounter::default(),
        }
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait]
impl GpuUsageStrategy for FakeGpuStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn try_usage(&self) -> Result<GpuUsage, GpuError> {
        self.calls.increment();
        self.result
            .ok_or_else(|| GpuError::Parse(format!("{} simulated failure", self.name)))
    }
}

/// An `AdapterEnumerator` with a fixed answer.
#[derive(Debug, Clone)]
pub struct FakeAdapterEnumerator {
    result: Result<Vec<String>, String>,
}

impl FakeAdapterEnumerator {
    pub fn with_names<S: Into<String>>(names: Vec<S>) -> Self {
        Self {
            result: Ok(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
        }
    }
}

impl AdapterEnumerator for FakeAdapterEnumerator {
    fn adapter_names(&self) -> Result<Vec<String>, GpuError> {
        self.result.clone().map_err(GpuError::Enumeration)
    }
}

/// An `EngineCounterSource` with a fixed answer.
#[derive(Debug, Clone)]
pub struct FakeEngineCounters {
    result: Result<Vec<f64>, String>,
}

impl FakeEngineCounters {
    pub fn new(values: Vec<f64>) -> Self {
        Self { result: Ok(values) }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
        }
    }
}

impl EngineCounterSource for FakeEngineCounters {
    fn engine_utilization(&self) -> Result<Vec<f64>, GpuError> {
        self.result.clone().map_err(GpuError::EngineCounters)
    }
}

/// Scripted failures and the bytes held by a `FakeLogSink`.
#[derive(Debug, Clone, Default)]
pub struct FakeLogSinkState {
    pub bytes: Vec<u8>,
    /// Number of upcoming appends that fail.
    pub failing_appends: u32,
    /// Bytes a failing append still writes before it errors.
    pub partial_write_len: usize,
    pub fail_sync: bool,
    pub fail_truncate: bool,
    pub syncs: u64,
}

/// An in-memory `LogSink` that can fail partway through a write.
#[derive(Debug, Clone, Default)]
pub struct FakeLogSink {
    state: Arc<Mutex<FakeLogSinkState>>,
}

impl FakeLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` appends write `partial_write_len` bytes and fail.
    pub fn fail_next_appends(&self, count: u32, partial_write_len: usize) {
        let mut state = self.state.lock().unwrap();
        state.failing_appends = count;
        state.partial_write_len = partial_write_len;
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeLogSinkState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn state(&self) -> FakeLogSinkState {
        self.state.lock().unwrap().clone()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.state().bytes).unwrap()
    }
}

impl LogSink for FakeLogSink {
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_appends > 0 {
            state.failing_appends -= 1;
            let written = state.partial_write_len.min(bytes.len());
            state.bytes.extend_from_slice(&bytes[..written]);
            return Err(io::Error::other("simulated full disk"));
        }
        state.bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sync {
            return Err(io::Error::other("simulated sync failure"));
        }
        state.syncs += 1;
        Ok(())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_truncate {
            return Err(io::Error::other("simulated truncate failure"));
        }
        state.bytes.truncate(len as usize);
        Ok(())
    }
}

/// Builds a reading with distinct, two-decimal values derived from `seq`.
pub fn sample_reading(seq: u32) -> Reading {
    let base = seq as f64;
    Reading {
        timestamp: Local
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .expect("valid fixed timestamp")
            + chrono::Duration::seconds(seq as i64),
        cpu_usage_percent: 12.5,
        memory_used_mb: 4096.0 + base,
        memory_total_mb: 8192.0,
        memory_usage_percent: 50.0,
        gpu_vendor: GpuVendor::Nvidia,
        gpu_usage_percent: 3.2,
        gpu_memory_used_mb: 512.0,
        disk_read_mbps: 1.25,
        disk_write_mbps: 0.4,
    }
}
