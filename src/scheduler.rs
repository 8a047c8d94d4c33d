//! The sampling scheduler.
//!
//! A `Scheduler` is either idle or running exactly one session. Starting a
//! session opens a new session log, clears the shared history and spawns a
//! single tick task. Ticks run inline inside that task, so a slow tick delays
//! the next one instead of overlapping with it. Stopping waits for the task to
//! finish its in-flight tick and close the log.

use crate::{
    collector::MetricsCollector,
    core::{GpuVendor, Reading},
    history::HistoryBuffer,
    session_log::{LogError, SessionLogger},
};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, warn};

/// Readings buffered for each broadcast subscriber before it starts lagging.
const READING_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("a monitoring session is already running")]
    AlreadyRunning,

    #[error("no monitoring session is running")]
    NotRunning,

    #[error("sampling interval must be greater than zero")]
    InvalidInterval,

    #[error("could not open the session log: {0}")]
    LogOpen(#[source] LogError),

    #[error("the sampling task terminated abnormally: {0}")]
    TickLane(String),
}

/// Settings that outlive individual sessions.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub history_capacity: usize,
    pub log_directory: PathBuf,
}

impl From<&crate::config::Config> for SchedulerOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            history_capacity: config.sampling.history_capacity,
            log_directory: config.logging.directory.clone(),
        }
    }
}

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub log_path: PathBuf,
    /// Ticks that completed, each of which pushed one reading.
    pub ticks: u64,
    /// Readings that could not be written to the session log.
    pub records_lost: u64,
}

/// Opens the log for a new session inside the given directory.
pub type LogOpener = dyn Fn(&Path) -> Result<SessionLogger, LogError> + Send + Sync;

/// Control handles for the session currently running.
struct RunningSession {
    stop_tx: watch::Sender<bool>,
    interval_tx: watch::Sender<Duration>,
    log_path: PathBuf,
    handle: JoinHandle<SessionSummary>,
}

/// Drives periodic sampling and owns the session lifecycle.
pub struct Scheduler {
    collector: Arc<Mutex<MetricsCollector>>,
    gpu_vendor: GpuVendor,
    history: HistoryBuffer,
    readings_tx: broadcast::Sender<Reading>,
    log_directory: std::sync::Mutex<PathBuf>,
    log_opener: Box<LogOpener>,
    session: Mutex<Option<RunningSession>>,
}

fn validate_interval(interval: Duration) -> Result<(), SchedulerError> {
    if interval.is_zero() {
        Err(SchedulerError::InvalidInterval)
    } else {
        Ok(())
    }
}

/// A ticker whose first tick fires one full `period` from now.
fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Scheduler {
    pub fn new(collector: MetricsCollector, options: SchedulerOptions) -> Self {
        let (readings_tx, _) = broadcast::channel(READING_CHANNEL_CAPACITY);
        Self {
            gpu_vendor: collector.gpu_vendor(),
            collector: Arc::new(Mutex::new(collector)),
            history: HistoryBuffer::new(options.history_capacity),
            readings_tx,
            log_directory: std::sync::Mutex::new(options.log_directory),
            log_opener: Box::new(|directory: &Path| SessionLogger::open(directory)),
            session: Mutex::new(None),
        }
    }

    /// Replaces how session logs are opened, e.g. to write to a sink other
    /// than a file in the log directory.
    pub fn with_log_opener(
        mut self,
        opener: impl Fn(&Path) -> Result<SessionLogger, LogError> + Send + Sync + 'static,
    ) -> Self {
        self.log_opener = Box::new(opener);
        self
    }

    /// The shared history buffer fed by every session.
    pub fn history(&self) -> HistoryBuffer {
        self.history.clone()
    }

    /// Subscribes to every reading produced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Reading> {
        self.readings_tx.subscribe()
    }

    pub fn gpu_vendor(&self) -> GpuVendor {
        self.gpu_vendor
    }

    pub fn log_directory(&self) -> PathBuf {
        self.log_directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Changes where the next session's log is written. A running session
    /// keeps its current file.
    pub fn set_log_directory(&self, directory: impl AsRef<Path>) {
        *self
            .log_directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = directory.as_ref().to_path_buf();
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// The log file of the running session.
    pub async fn log_path(&self) -> Option<PathBuf> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.log_path.clone())
    }

    /// The sampling period of the running session.
    pub async fn current_interval(&self) -> Option<Duration> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| *session.interval_tx.borrow())
    }

    /// Starts a new session that samples every `interval`.
    ///
    /// Returns the path of the new session log.
    #[instrument(skip(self))]
    pub async fn start(&self, interval: Duration) -> Result<PathBuf, SchedulerError> {
        validate_interval(interval)?;
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let logger =
            (self.log_opener)(&self.log_directory()).map_err(SchedulerError::LogOpen)?;
        let log_path = logger.path().to_path_buf();
        self.history.clear();

        let (stop_tx, stop_rx) = watch::channel(false);
        let (interval_tx, interval_rx) = watch::channel(interval);
        let lane = TickLane {
            collector: self.collector.clone(),
            history: self.history.clone(),
            readings_tx: self.readings_tx.clone(),
            logger,
            ticks: 0,
            records_lost: 0,
        };
        let handle = tokio::spawn(lane.run(stop_rx, interval_rx));

        *session = Some(RunningSession {
            stop_tx,
            interval_tx,
            log_path: log_path.clone(),
            handle,
        });
        info!(
            interval_ms = interval.as_millis() as u64,
            log = %log_path.display(),
            "Monitoring session started"
        );
        Ok(log_path)
    }

    /// Changes the sampling period of the running session. The new period
    /// applies from the next scheduled tick; history is kept.
    #[instrument(skip(self))]
    pub async fn change_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        validate_interval(interval)?;
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(SchedulerError::NotRunning)?;
        session
            .interval_tx
            .send(interval)
            .map_err(|_| SchedulerError::TickLane("sampling task is gone".to_string()))?;
        info!(interval_ms = interval.as_millis() as u64, "Sampling interval changed");
        Ok(())
    }

    /// Stops the running session, if any.
    ///
    /// Returns once the in-flight tick (if any) has completed and the session
    /// log is closed; no tick runs after this returns. Stopping an idle
    /// scheduler is a no-op that returns `Ok(None)`.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<Option<SessionSummary>, SchedulerError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.take() else {
            debug!("Stop requested while idle, nothing to do.");
            return Ok(None);
        };

        let _ = session.stop_tx.send(true);
        match session.handle.await {
            Ok(summary) => {
                info!(
                    ticks = summary.ticks,
                    records_lost = summary.records_lost,
                    log = %summary.log_path.display(),
                    "Monitoring session stopped"
                );
                Ok(Some(summary))
            }
            Err(e) => {
                error!(error = %e, "Sampling task panicked");
                Err(SchedulerError::TickLane(e.to_string()))
            }
        }
    }
}

/// The single serialized lane that executes a session's ticks.
struct TickLane {
    collector: Arc<Mutex<MetricsCollector>>,
    history: HistoryBuffer,
    readings_tx: broadcast::Sender<Reading>,
    logger: SessionLogger,
    ticks: u64,
    records_lost: u64,
}

impl TickLane {
    async fn run(
        mut self,
        mut stop_rx: watch::Receiver<bool>,
        mut interval_rx: watch::Receiver<Duration>,
    ) -> SessionSummary {
        let mut timer = ticker(*interval_rx.borrow_and_update());
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => {
                    debug!("Sampling task received stop signal.");
                    break;
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *interval_rx.borrow_and_update();
                    timer = ticker(period);
                }
                _ = timer.tick() => {
                    self.tick().await;
                }
            }
        }
        self.finish()
    }

    async fn tick(&mut self) {
        let started = std::time::Instant::now();
        let reading = self.collector.lock().await.sample().await;

        self.history.push(reading.clone());
        match self.logger.append(&reading) {
            Ok(()) => {}
            Err(e) if e.is_record_lost() => {
                self.records_lost += 1;
                warn!(error = %e, "Failed to append reading to session log, record lost");
                metrics::counter!("session_log_records_lost_total").increment(1);
            }
            Err(e) => warn!(error = %e, "Reading logged but not confirmed durable"),
        }
        // No subscribers is fine; the history buffer still has the reading.
        let _ = self.readings_tx.send(reading);

        self.ticks += 1;
        metrics::counter!("ticks_total").increment(1);
        metrics::histogram!("tick_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    fn finish(mut self) -> SessionSummary {
        if let Err(e) = self.logger.close() {
            warn!(error = %e, "Failed to close session log cleanly");
        }
        SessionSummary {
            log_path: self.logger.path().to_path_buf(),
            ticks: self.ticks,
            records_lost: self.records_lost,
        }
    }
}
