//! A bounded, insertion-ordered sliding window of readings.
//!
//! The buffer is a cloneable handle. The tick lane pushes into it while the
//! presentation layer takes snapshots from other tasks; a snapshot is an
//! owned copy taken under a short read lock, so callers never observe a
//! partially updated window.

use crate::core::Reading;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

/// Five minutes of history at one reading per second.
pub const DEFAULT_HISTORY_CAPACITY: usize = 300;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    readings: Arc<RwLock<VecDeque<Reading>>>,
    capacity: usize,
}

/// Flattened per-metric series for chart rendering.
///
/// `x` is the position of each reading in the window, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSeries {
    pub x: Vec<f64>,
    pub cpu_usage_percent: Vec<f64>,
    pub memory_usage_percent: Vec<f64>,
    pub gpu_usage_percent: Vec<f64>,
    pub disk_read_mbps: Vec<f64>,
    pub disk_write_mbps: Vec<f64>,
}

impl ChartSeries {
    pub fn from_readings(readings: &[Reading]) -> Self {
        let mut series = Self::default();
        for (i, reading) in readings.iter().enumerate() {
            series.x.push(i as f64);
            series.cpu_usage_percent.push(reading.cpu_usage_percent);
            series.memory_usage_percent.push(reading.memory_usage_percent);
            series.gpu_usage_percent.push(reading.gpu_usage_percent);
            series.disk_read_mbps.push(reading.disk_read_mbps);
            series.disk_write_mbps.push(reading.disk_write_mbps);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

impl HistoryBuffer {
    /// Creates an empty buffer holding at most `capacity` readings.
    ///
    /// A zero capacity is raised to one with a warning. Configuration
    /// rejects zero, but `SchedulerOptions` built by hand skip that check.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            warn!("History capacity of 0 requested, keeping 1 reading instead");
        }
        let capacity = capacity.max(1);
        Self {
            readings: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a reading, evicting the oldest one when the buffer is full.
    pub fn push(&self, reading: Reading) {
        let len = {
            let mut readings = self.readings.write().unwrap_or_else(PoisonError::into_inner);
            while readings.len() >= self.capacity {
                readings.pop_front();
            }
            readings.push_back(reading);
            readings.len()
        };
        metrics::gauge!("history_buffer_len").set(len as f64);
    }

    /// Returns a point-in-time copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<Reading> {
        let readings = self.readings.read().unwrap_or_else(PoisonError::into_inner);
        readings.iter().cloned().collect()
    }

    /// The most recent reading, for live numeric labels.
    pub fn latest(&self) -> Option<Reading> {
        let readings = self.readings.read().unwrap_or_else(PoisonError::into_inner);
        readings.back().cloned()
    }

    /// Chart series built from a fresh snapshot.
    pub fn series(&self) -> ChartSeries {
        ChartSeries::from_readings(&self.snapshot())
    }

    pub fn len(&self) -> usize {
        self.readings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the buffer. Called when a new session starts.
    pub fn clear(&self) {
        self.readings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        metrics::gauge!("history_buffer_len").set(0.0);
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
