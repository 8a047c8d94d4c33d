//! Integration tests for the sampling session lifecycle.

use async_trait::async_trait;
use hostwatch::{
    collector::MetricsCollector,
    gpu::{GpuError, GpuProbe},
    session_log::{parse_session_log, read_session_log, SessionLogger, HEADER},
    test_utils::{FakeCounterSource, FakeGpuStrategy, FakeLogSink},
    GpuUsage, GpuUsageStrategy, GpuVendor, Scheduler, SchedulerError, SchedulerOptions,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn collector_with_gpu(strategy: impl GpuUsageStrategy + 'static) -> MetricsCollector {
    MetricsCollector::new(
        FakeCounterSource::new(),
        GpuProbe::new(GpuVendor::Nvidia, vec![Box::new(strategy)]),
    )
}

fn scheduler_in(dir: &TempDir) -> Scheduler {
    Scheduler::new(
        collector_with_gpu(FakeGpuStrategy::succeeding("nvidia-smi", 40.0, 1024.0)),
        SchedulerOptions {
            history_capacity: 10,
            log_directory: dir.path().join("logs"),
        },
    )
}

/// A scheduler whose session logs are written to `sink` instead of a file.
fn scheduler_logging_to(sink: &FakeLogSink) -> Scheduler {
    let sink = sink.clone();
    Scheduler::new(
        collector_with_gpu(FakeGpuStrategy::succeeding("nvidia-smi", 40.0, 1024.0)),
        SchedulerOptions {
            history_capacity: 10,
            log_directory: "unused".into(),
        },
    )
    .with_log_opener(move |dir| SessionLogger::with_sink(dir.join("session.csv"), sink.clone()))
}

/// A GPU tier that takes a fixed amount of time and records how many calls
/// were ever in flight at once.
struct SlowGpu {
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

#[async_trait]
impl GpuUsageStrategy for SlowGpu {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn try_usage(&self) -> Result<GpuUsage, GpuError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(GpuUsage::default())
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_log_has_header_and_one_row_per_tick() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    let log_path = scheduler.start(Duration::from_secs(1)).await.unwrap();
    assert!(scheduler.is_running().await);
    assert_eq!(scheduler.log_path().await, Some(log_path.clone()));
    assert_eq!(scheduler.current_interval().await, Some(Duration::from_secs(1)));

    // First tick fires one interval after start.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    let summary = scheduler.stop().await.unwrap().expect("session was running");

    assert_eq!(summary.ticks, 3);
    assert_eq!(summary.records_lost, 0);
    assert_eq!(summary.log_path, log_path);
    assert!(!scheduler.is_running().await);
    assert_eq!(scheduler.log_path().await, None);

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(content.lines().next(), Some(HEADER.join(",").as_str()));
    let records = read_session_log(&log_path).unwrap();
    assert_eq!(records.len() as u64, summary.ticks);
    assert!(records.iter().all(|r| r.gpu_usage_percent == 40.0));

    let history = scheduler.history();
    assert_eq!(history.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_running_is_rejected() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    scheduler.start(Duration::from_secs(1)).await.unwrap();
    let second = scheduler.start(Duration::from_secs(2)).await;
    assert!(matches!(second, Err(SchedulerError::AlreadyRunning)));
    assert_eq!(scheduler.current_interval().await, Some(Duration::from_secs(1)));

    scheduler.stop().await.unwrap();
    let files = std::fs::read_dir(dir.path().join("logs")).unwrap().count();
    assert_eq!(files, 1, "A rejected start must not create a log file");
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_idle_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    assert!(scheduler.stop().await.unwrap().is_none());

    scheduler.start(Duration::from_secs(1)).await.unwrap();
    assert!(scheduler.stop().await.unwrap().is_some());
    assert!(scheduler.stop().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_is_rejected() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    let result = scheduler.start(Duration::ZERO).await;
    assert!(matches!(result, Err(SchedulerError::InvalidInterval)));
    assert!(!scheduler.is_running().await);
    assert!(!dir.path().join("logs").exists());

    scheduler.start(Duration::from_secs(1)).await.unwrap();
    let result = scheduler.change_interval(Duration::ZERO).await;
    assert!(matches!(result, Err(SchedulerError::InvalidInterval)));
    assert_eq!(scheduler.current_interval().await, Some(Duration::from_secs(1)));
    scheduler.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_change_interval_requires_a_running_session() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    let result = scheduler.change_interval(Duration::from_millis(500)).await;
    assert!(matches!(result, Err(SchedulerError::NotRunning)));
}

#[tokio::test(start_paused = true)]
async fn test_change_interval_keeps_history_and_log() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    let log_path = scheduler.start(Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(scheduler.history().len(), 2);

    scheduler
        .change_interval(Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(
        scheduler.current_interval().await,
        Some(Duration::from_millis(500))
    );

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let summary = scheduler.stop().await.unwrap().unwrap();

    assert_eq!(summary.ticks, 4);
    assert_eq!(summary.log_path, log_path);
    assert_eq!(scheduler.history().len(), 4);
    assert_eq!(read_session_log(&log_path).unwrap().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_history_survives_stop_and_is_cleared_by_the_next_start() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    let first_log = scheduler.start(Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.stop().await.unwrap();
    assert_eq!(scheduler.history().len(), 2);

    // Nothing ticks while idle.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(scheduler.history().len(), 2);

    let second_log = scheduler.start(Duration::from_secs(1)).await.unwrap();
    assert!(scheduler.history().is_empty());
    assert_ne!(first_log, second_log);
    scheduler.stop().await.unwrap();

    assert_eq!(read_session_log(&first_log).unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_log_directory_fails_start_and_keeps_history() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    scheduler.start(Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    scheduler.stop().await.unwrap();
    assert_eq!(scheduler.history().len(), 1);

    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    scheduler.set_log_directory(blocker.join("logs"));

    let result = scheduler.start(Duration::from_secs(1)).await;
    assert!(matches!(result, Err(SchedulerError::LogOpen(_))));
    assert!(!scheduler.is_running().await);
    assert_eq!(scheduler.history().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_log_writes_are_counted_and_sampling_continues() {
    init_tracing();
    let sink = FakeLogSink::new();
    let scheduler = scheduler_logging_to(&sink);
    // The header is already written; the first two rows hit a full disk
    // after writing a fragment.
    sink.fail_next_appends(2, 10);

    let log_path = scheduler.start(Duration::from_secs(1)).await.unwrap();
    assert_eq!(log_path, std::path::PathBuf::from("unused/session.csv"));
    tokio::time::sleep(Duration::from_millis(4500)).await;
    let summary = scheduler.stop().await.unwrap().expect("session was running");

    assert_eq!(summary.ticks, 4);
    assert_eq!(summary.records_lost, 2);
    assert_eq!(scheduler.history().len(), 4);

    // No fragment of the failed rows survives; the log parses cleanly.
    let content = sink.contents();
    assert!(content.starts_with(&HEADER.join(",")));
    assert_eq!(content.lines().count(), 3);
    let records = parse_session_log(content.as_bytes()).unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsynced_rows_are_not_counted_as_lost() {
    init_tracing();
    let sink = FakeLogSink::new();
    let scheduler = scheduler_logging_to(&sink);

    scheduler.start(Duration::from_secs(1)).await.unwrap();
    sink.update(|s| s.fail_sync = true);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let summary = scheduler.stop().await.unwrap().expect("session was running");

    assert_eq!(summary.ticks, 2);
    assert_eq!(summary.records_lost, 0);
    let records = parse_session_log(sink.contents().as_bytes()).unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_receive_every_reading() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);
    let mut readings = scheduler.subscribe();

    scheduler.start(Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.stop().await.unwrap();

    let first = readings.recv().await.unwrap();
    let second = readings.recv().await.unwrap();
    assert!(first.timestamp <= second.timestamp);
    assert_eq!(first.gpu_vendor, GpuVendor::Nvidia);
    assert_eq!(scheduler.history().snapshot(), vec![first, second]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_ticks_never_overlap() {
    let dir = TempDir::new().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let scheduler = Scheduler::new(
        collector_with_gpu(SlowGpu {
            delay: Duration::from_millis(2500),
            active: active.clone(),
            max_active: max_active.clone(),
        }),
        SchedulerOptions {
            history_capacity: 10,
            log_directory: dir.path().to_path_buf(),
        },
    );

    scheduler.start(Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    let summary = scheduler.stop().await.unwrap().unwrap();

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert!(summary.ticks >= 2);
    assert!(summary.ticks < 10, "Slow ticks must delay later ones");
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_the_in_flight_tick() {
    let dir = TempDir::new().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let scheduler = Scheduler::new(
        collector_with_gpu(SlowGpu {
            delay: Duration::from_secs(2),
            active: active.clone(),
            max_active: Arc::new(AtomicUsize::new(0)),
        }),
        SchedulerOptions {
            history_capacity: 10,
            log_directory: dir.path().to_path_buf(),
        },
    );

    let log_path = scheduler.start(Duration::from_secs(1)).await.unwrap();
    // The first tick starts at 1s and is still sampling at 1.5s.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(active.load(Ordering::SeqCst), 1);

    let summary = scheduler.stop().await.unwrap().unwrap();
    assert_eq!(active.load(Ordering::SeqCst), 0);
    assert_eq!(summary.ticks, 1);
    assert_eq!(read_session_log(&log_path).unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(scheduler.history().len(), 1, "No tick may run after stop");
}
