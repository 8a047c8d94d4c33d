//! HostWatch - host resource sampler
//!
//! Samples CPU, memory, disk and GPU utilization at a fixed interval, prints
//! each reading and records the session to a CSV file until interrupted.

use anyhow::Result;
use clap::Parser;
use hostwatch::{
    cli::Cli,
    collector::MetricsCollector,
    config::Config,
    formatting::formatter_for,
    internal_metrics::{self, logging_recorder::LoggingRecorder},
    Scheduler, SchedulerOptions,
};
use std::time::Duration;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        init_tracing("info");
        error!("Failed to load configuration: {:#}", err);
        std::process::exit(1);
    });

    init_tracing(&config.log_level);

    info!("HostWatch starting up...");

    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Sampling Interval: {}ms", config.sampling.interval_ms);
    info!("History Capacity: {}", config.sampling.history_capacity);
    info!("Log Directory: {}", config.logging.directory.display());
    info!("GPU Tool: {}", config.gpu.tool_path);
    info!("GPU Tool Timeout: {}ms", config.gpu.tool_timeout_ms);
    info!("Output Format: {}", config.output.format);
    info!("Log Metrics: {}", config.metrics.log_metrics);
    if let Some(seconds) = cli.duration {
        info!("Duration: {}s", seconds);
    }
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let mut metrics_task: Option<JoinHandle<()>> = None;
    if config.metrics.log_metrics {
        info!(
            "Logging recorder enabled. Metrics will be printed every {} seconds.",
            config.metrics.log_aggregation_seconds
        );
        let (recorder, handle) = LoggingRecorder::new(
            Duration::from_secs(config.metrics.log_aggregation_seconds.max(1)),
            shutdown_rx.clone(),
        );
        match metrics::set_global_recorder(recorder) {
            Ok(()) => metrics_task = Some(handle),
            Err(e) => {
                warn!("Failed to install logging recorder: {}", e);
                handle.abort();
            }
        }
    }
    internal_metrics::describe_metrics();

    let collector = MetricsCollector::from_config(&config.gpu);
    info!("GPU Vendor: {}", collector.gpu_vendor());
    let scheduler = Scheduler::new(collector, SchedulerOptions::from(&config));

    // Subscribe before starting so the first reading is not missed.
    let mut readings = scheduler.subscribe();
    let reporter_task = {
        let formatter = formatter_for(config.output.format);
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    received = readings.recv() => match received {
                        Ok(reading) => {
                            if let Some(line) = formatter.format_reading(&reading) {
                                println!("{}", line);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Reporter fell behind, skipped {} readings", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    };

    let log_path = scheduler.start(config.sampling.interval()).await?;
    info!("Recording session to {}", log_path.display());

    match cli.duration {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                    info!("Requested duration elapsed. Shutting down...");
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("Shutdown signal received. Shutting down gracefully...");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received. Shutting down gracefully...");
        }
    }

    match scheduler.stop().await {
        Ok(Some(summary)) => info!(
            "Session finished: {} readings written to {} ({} lost)",
            summary.ticks.saturating_sub(summary.records_lost),
            summary.log_path.display(),
            summary.records_lost
        ),
        Ok(None) => {}
        Err(e) => error!("Failed to stop sampling session: {}", e),
    }

    // Ignore the error: all receivers may already be gone.
    let _ = shutdown_tx.send(());

    if let Err(e) = reporter_task.await {
        error!("Reporter task panicked: {:?}", e);
    }
    if let Some(handle) = metrics_task {
        if let Err(e) = handle.await {
            error!("Metrics task panicked: {:?}", e);
        }
    }

    info!("All tasks shut down. Exiting.");
    Ok(())
}
