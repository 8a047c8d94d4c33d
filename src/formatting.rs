// src/formatting.rs

use crate::config::OutputFormat;
use crate::core::Reading;

/// A trait for rendering one reading as a single line of output.
///
/// `None` means the reading could not be rendered and nothing should be
/// printed for it.
pub trait ReadingFormatter: Send + Sync {
    fn format_reading(&self, reading: &Reading) -> Option<String>;
}

/// The live label line, e.g.
/// `CPU: 12.5% | Memory: 4096 MB (50.0%) | GPU: 3.2% | 512 MB | Disk: R:1.25 MB/s | W:0.40 MB/s`.
pub struct PlainTextFormatter;

impl ReadingFormatter for PlainTextFormatter {
    fn format_reading(&self, reading: &Reading) -> Option<String> {
        Some(format!(
            "CPU: {:.1}% | Memory: {:.0} MB ({:.1}%) | GPU: {:.1}% | {:.0} MB | Disk: R:{:.2} MB/s | W:{:.2} MB/s",
            reading.cpu_usage_percent,
            reading.memory_used_mb,
            reading.memory_usage_percent,
            reading.gpu_usage_percent,
            reading.gpu_memory_used_mb,
            reading.disk_read_mbps,
            reading.disk_write_mbps,
        ))
    }
}

/// One JSON object per line.
pub struct JsonFormatter;

impl ReadingFormatter for JsonFormatter {
    fn format_reading(&self, reading: &Reading) -> Option<String> {
        serde_json::to_string(reading)
            .map_err(|e| tracing::error!("Failed to serialize reading to JSON: {}", e))
            .ok()
    }
}

/// Picks the formatter for the configured output format.
pub fn formatter_for(format: OutputFormat) -> Box<dyn ReadingFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::PlainText => Box::new(PlainTextFormatter),
    }
}
