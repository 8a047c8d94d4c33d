//! # Internal Metrics Module
//!
//! Diagnostics about the sampler itself, recorded through the `metrics`
//! facade. Without an installed recorder every call is a no-op; the binary
//! installs a [`logging_recorder::LoggingRecorder`] when `metrics.log_metrics`
//! is enabled.

pub mod logging_recorder;

use metrics::Unit;

/// Registers descriptions for every metric the crate emits.
pub fn describe_metrics() {
    metrics::describe_counter!("ticks_total", Unit::Count, "Total number of sampling ticks completed.");
    metrics::describe_histogram!("tick_duration_seconds", Unit::Seconds, "Time taken by one tick: sample, history push, log append and publish.");
    metrics::describe_counter!("collector_source_failures_total", Unit::Count, "Sub-reads that failed and were reported as zero, labeled by source.");
    metrics::describe_counter!("gpu_tier_failures_total", Unit::Count, "GPU strategy attempts that failed and fell through, labeled by tier.");
    metrics::describe_counter!("session_log_records_lost_total", Unit::Count, "Readings that could not be appended to the session log.");
    metrics::describe_gauge!("history_buffer_len", Unit::Count, "Number of readings currently held in the history buffer.");
}
