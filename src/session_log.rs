//! Durable, append-only CSV log of the readings taken during one session.
//!
//! Every monitoring session gets its own `metrics_<YYYYMMDD_HHmmss>.csv`
//! file. Each record is written whole and synced before `append` returns, so
//! a process that dies right after a tick still leaves that tick on disk.
//!
//! A record whose write fails is rolled back to the last complete record.
//! It is lost, and later records are never spliced onto a partial row.

use crate::core::Reading;
use chrono::{Local, NaiveDateTime};
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Column names, written once as the first row of every session file.
pub const HEADER: [&str; 8] = [
    "Timestamp",
    "CPU_Usage_%",
    "Memory_Used_MB",
    "Memory_Usage_%",
    "GPU_Usage_%",
    "GPU_Memory_Used_MB",
    "Disk_Read_MBps",
    "Disk_Write_MBps",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[error("failed to create log file in {path}: {source}")]
    CreateFile { path: PathBuf, source: io::Error },

    #[error("no free log file name in {0}")]
    NameExhausted(PathBuf),

    #[error("log write failed: {0}")]
    Io(#[from] io::Error),

    #[error("record written but not synced to storage: {0}")]
    Sync(#[source] io::Error),

    #[error("log record could not be encoded: {0}")]
    Csv(#[from] csv::Error),

    #[error("session log is closed")]
    Closed,
}

impl LogError {
    /// Whether the record passed to the failed `append` is missing from the
    /// log. A sync failure leaves the record in the file.
    pub fn is_record_lost(&self) -> bool {
        !matches!(self, Self::Sync(_))
    }
}

/// Byte storage behind a session log.
pub trait LogSink: Send {
    /// Appends `bytes` at the current end of the log.
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Forces appended bytes to durable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Cuts the log back to `len` bytes; the next append continues there.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

/// The writer for one session's log.
pub struct SessionLogger {
    path: PathBuf,
    sink: Option<Box<dyn LogSink>>,
    /// Length of the log up to the end of the last complete record.
    committed_len: u64,
    /// Set while a failed write may have left a partial row behind.
    needs_rollback: bool,
}

impl SessionLogger {
    /// Creates `directory` if needed, opens a new session file inside it and
    /// writes the header row.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, LogError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).map_err(|source| LogError::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })?;

        let stamp = Local::now().format(FILE_STAMP_FORMAT).to_string();
        let (path, file) = create_unique_file(directory, &stamp)?;
        let logger = Self::with_sink(path, file)?;

        info!(path = %logger.path.display(), "Opened session log");
        Ok(logger)
    }

    /// Starts a session log on an arbitrary sink and writes the header row.
    /// `path` is only reported back through `path()`.
    pub fn with_sink(
        path: impl Into<PathBuf>,
        sink: impl LogSink + 'static,
    ) -> Result<Self, LogError> {
        let mut sink: Box<dyn LogSink> = Box::new(sink);
        let header = encode_row(HEADER)?;
        sink.append_bytes(&header)?;
        sink.sync().map_err(LogError::Sync)?;
        Ok(Self {
            path: path.into(),
            sink: Some(sink),
            committed_len: header.len() as u64,
            needs_rollback: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Writes one reading and forces it to storage.
    pub fn append(&mut self, reading: &Reading) -> Result<(), LogError> {
        let sink = self.sink.as_mut().ok_or(LogError::Closed)?;
        let row = encode_row(&format_record(reading))?;

        if self.needs_rollback {
            sink.truncate_to(self.committed_len)?;
            self.needs_rollback = false;
        }

        if let Err(e) = sink.append_bytes(&row) {
            match sink.truncate_to(self.committed_len) {
                Ok(()) => debug!(len = self.committed_len, "Rolled back partial log record"),
                Err(rollback) => {
                    warn!(error = %rollback, "Could not roll back partial log record, retrying on next append");
                    self.needs_rollback = true;
                }
            }
            return Err(LogError::Io(e));
        }
        self.committed_len += row.len() as u64;

        sink.sync().map_err(LogError::Sync)
    }

    /// Syncs and releases the sink. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), LogError> {
        if let Some(mut sink) = self.sink.take() {
            if self.needs_rollback {
                sink.truncate_to(self.committed_len)?;
                self.needs_rollback = false;
            }
            sink.sync().map_err(LogError::Sync)?;
            debug!(path = %self.path.display(), "Closed session log");
        }
        Ok(())
    }
}

/// Encodes one CSV row, terminator included, into an owned buffer.
fn encode_row<I, T>(fields: I) -> Result<Vec<u8>, LogError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| LogError::Io(e.into_error()))
}

/// Tries `metrics_<stamp>.csv`, then `metrics_<stamp>_1.csv`, and so on, so
/// an existing session file is never reopened.
fn create_unique_file(directory: &Path, stamp: &str) -> Result<(PathBuf, File), LogError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("metrics_{}.csv", stamp)
        } else {
            format!("metrics_{}_{}.csv", stamp, attempt)
        };
        let path = directory.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(LogError::CreateFile {
                    path: directory.to_path_buf(),
                    source,
                })
            }
        }
    }
    Err(LogError::NameExhausted(directory.to_path_buf()))
}

/// Renders a reading as the eight logged columns.
pub fn format_record(reading: &Reading) -> [String; 8] {
    [
        reading.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        format!("{:.2}", reading.cpu_usage_percent),
        format!("{:.2}", reading.memory_used_mb),
        format!("{:.2}", reading.memory_usage_percent),
        format!("{:.2}", reading.gpu_usage_percent),
        format!("{:.2}", reading.gpu_memory_used_mb),
        format!("{:.2}", reading.disk_read_mbps),
        format!("{:.2}", reading.disk_write_mbps),
    ]
}

/// One row of a session log, as read back for offline analysis.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LogRecord {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CPU_Usage_%")]
    pub cpu_usage_percent: f64,
    #[serde(rename = "Memory_Used_MB")]
    pub memory_used_mb: f64,
    #[serde(rename = "Memory_Usage_%")]
    pub memory_usage_percent: f64,
    #[serde(rename = "GPU_Usage_%")]
    pub gpu_usage_percent: f64,
    #[serde(rename = "GPU_Memory_Used_MB")]
    pub gpu_memory_used_mb: f64,
    #[serde(rename = "Disk_Read_MBps")]
    pub disk_read_mbps: f64,
    #[serde(rename = "Disk_Write_MBps")]
    pub disk_write_mbps: f64,
}

impl LogRecord {
    /// Parses the timestamp column.
    pub fn parsed_timestamp(&self) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT)
    }
}

/// Reads every record of a session log file, validating the header row.
pub fn read_session_log(path: impl AsRef<Path>) -> Result<Vec<LogRecord>, LogError> {
    parse_session_log(File::open(path.as_ref())?)
}

/// Parses session log content from any reader, validating the header row.
pub fn parse_session_log<R: io::Read>(source: R) -> Result<Vec<LogRecord>, LogError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(source);

    let headers = reader.headers()?.clone();
    if headers.iter().ne(HEADER.iter().copied()) {
        return Err(LogError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected session log header: {:?}", headers),
        )));
    }

    reader
        .deserialize()
        .map(|record| record.map_err(LogError::from))
        .collect()
}
