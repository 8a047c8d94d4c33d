//! A metrics recorder that periodically logs all captured metrics.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A metrics recorder that writes a snapshot of every metric to `tracing`
/// once per aggregation interval.
///
/// Counters and gauges are reported as they stand. Histograms are drained on
/// each snapshot and reported as a sample count and mean for that window.
pub struct LoggingRecorder {
    registry: Arc<Registry<Key, AtomicStorage>>,
}

impl LoggingRecorder {
    /// Creates a new `LoggingRecorder` and starts the background task that
    /// logs it. The task ends when `shutdown_rx` changes or its sender is
    /// dropped.
    pub fn new(
        aggregation_interval: Duration,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let registry = Arc::new(Registry::new(AtomicStorage));
        let recorder = Self {
            registry: registry.clone(),
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + aggregation_interval,
                aggregation_interval,
            );
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Metrics logging task received shutdown signal.");
                        break;
                    }
                    _ = ticker.tick() => log_snapshot(&registry),
                }
            }
            // One last snapshot so short runs still report something.
            log_snapshot(&registry);
        });

        (recorder, handle)
    }
}

fn log_snapshot(registry: &Registry<Key, AtomicStorage>) {
    tracing::info!("--- Metrics Snapshot ---");

    for (key, counter) in registry.get_counter_handles() {
        tracing::info!("[Counter] {}: {}", key, counter.load(Ordering::Relaxed));
    }

    for (key, gauge) in registry.get_gauge_handles() {
        let value = f64::from_bits(gauge.load(Ordering::Relaxed));
        tracing::info!("[Gauge] {}: {}", key, value);
    }

    for (key, histogram) in registry.get_histogram_handles() {
        let mut count = 0usize;
        let mut sum = 0.0;
        histogram.clear_with(|values| {
            count += values.len();
            sum += values.iter().sum::<f64>();
        });
        if count > 0 {
            tracing::info!(
                "[Histogram] {}: count={} mean={:.6}",
                key,
                count,
                sum / count as f64
            );
        }
    }
}

impl Recorder for LoggingRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |c| c.clone()).into()
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |g| g.clone()).into()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.registry.get_or_create_histogram(key, |h| h.clone()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> Metadata<'static> {
        Metadata::new("test", metrics::Level::INFO, Some("test"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_drains_histograms_but_keeps_counters() {
        let interval = Duration::from_secs(10);
        let (tx, rx) = watch::channel(());
        let (recorder, handle) = LoggingRecorder::new(interval, rx);
        let registry = recorder.registry.clone();

        let counter_key = Key::from_name("ticks_total");
        recorder.register_counter(&counter_key, &metadata()).increment(3);
        let histogram_key = Key::from_name("tick_duration_seconds");
        let histogram = recorder.register_histogram(&histogram_key, &metadata());
        histogram.record(0.5);
        histogram.record(1.5);

        tokio::time::sleep(interval + Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        let counter_value = registry
            .get_counter_handles()
            .get(&counter_key)
            .unwrap()
            .load(Ordering::Relaxed);
        assert_eq!(counter_value, 3, "Counters are cumulative and never reset");

        let mut remaining = 0;
        registry
            .get_histogram_handles()
            .get(&histogram_key)
            .unwrap()
            .clear_with(|values| remaining += values.len());
        assert_eq!(remaining, 0, "Histogram samples are drained by the snapshot");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_task_exits_when_sender_dropped() {
        let (tx, rx) = watch::channel(());
        let (_recorder, handle) = LoggingRecorder::new(Duration::from_secs(3600), rx);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("logging task should stop")
            .unwrap();
    }
}
