/// HostWatch - periodic host resource sampling
///
/// This library samples CPU, memory, disk and GPU utilization on a fixed
/// cadence, keeps a bounded in-memory history for charting and writes every
/// reading to a durable per-session CSV log.
pub mod cli;
pub mod collector;
pub mod config;
pub mod core;
pub mod counters;
pub mod formatting;
pub mod gpu;
pub mod history;
pub mod internal_metrics;
pub mod scheduler;
pub mod session_log;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export core types for convenience
pub use core::*;
pub use scheduler::{Scheduler, SchedulerError, SchedulerOptions, SessionSummary};
