//! Wattline daemon
//!
//! This binary coordinates:
//! - Device polling, raw sample storage and inline detection
//! - Cascading power rollups and daily energy totals
//! - Retention sweeps
//!
//! Every job runs on its own scheduler and re-reads the TOML configuration
//! at the start of each cycle.

mod config;
mod jobs;
mod scheduler;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info};

use watt_archive::{DailyEnergyAggregator, RetentionSweeper, RollupBuilder, RollupSettings};
use watt_core::memory::MemoryAnomalyState;
use watt_core::Notifier;
use watt_db::DbClient;
use watt_ingest::{DeviceSource, SimulatorSource, TickProcessor};
use watt_sinks::{FanoutNotifier, LogNotifier, OutboxNotifier};

use crate::config::DaemonConfig;
use crate::jobs::{DailyJob, IngestJob, RetentionJob, RollupJob};
use crate::scheduler::{ConfigSource, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    watt_obs::init("wattd");

    info!("Starting Wattline daemon");

    let config = DaemonConfig::from_env()?;
    info!("Loaded configuration: {:?}", config);

    let db = DbClient::new(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    db.ping().await.context("Database ping failed")?;
    db.init_schema().await.context("Failed to create schema")?;
    info!("Database connection verified");

    let notifier = build_notifier(&config)?;
    let store = Arc::new(db.clone());
    let app_config = ConfigSource::new(config.config_path.clone()).reload().clone();
    let timezone = app_config.timezone()?;
    info!("Daily energy timezone: {}", timezone);

    let mut simulator = SimulatorSource::new(config.sim_devices);
    simulator
        .start()
        .await
        .context("Failed to start device source")?;
    info!(devices = ?simulator.device_ids(), "Device source started: {}", simulator.name());
    let source: Box<dyn DeviceSource> = Box::new(simulator);

    let processor = TickProcessor::new(
        Arc::clone(&store),
        Arc::new(MemoryAnomalyState::new()),
        notifier,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config_source = || ConfigSource::new(config.config_path.clone());

    let handles = vec![
        tokio::spawn(
            Scheduler::new(
                IngestJob::new(
                    source,
                    processor,
                    Duration::from_secs(config.poll_interval),
                ),
                config_source(),
                shutdown_rx.clone(),
            )
            .run(),
        ),
        tokio::spawn(
            Scheduler::new(
                RollupJob::new(RollupBuilder::new(
                    Arc::clone(&store),
                    RollupSettings::default(),
                )),
                config_source(),
                shutdown_rx.clone(),
            )
            .run(),
        ),
        tokio::spawn(
            Scheduler::new(
                DailyJob::new(DailyEnergyAggregator::new(Arc::clone(&store), timezone)),
                config_source(),
                shutdown_rx.clone(),
            )
            .run(),
        ),
        tokio::spawn(
            Scheduler::new(
                RetentionJob::new(RetentionSweeper::new(Arc::clone(&store))),
                config_source(),
                shutdown_rx,
            )
            .run(),
        ),
    ];

    info!("Daemon running - press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    // Schedulers finish their current cycle, then stop their jobs
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Scheduler task failed: {}", e);
        }
    }

    db.close().await;
    info!("Wattline daemon stopped");
    Ok(())
}

fn build_notifier(config: &DaemonConfig) -> Result<Arc<dyn Notifier>> {
    let Some(dir) = &config.notify_outbox else {
        return Ok(Arc::new(LogNotifier));
    };

    let outbox = OutboxNotifier::new(dir)
        .with_context(|| format!("Failed to open notification outbox {}", dir.display()))?;
    info!("Notification outbox: {}", outbox.path().display());
    Ok(Arc::new(FanoutNotifier::new(vec![
        Arc::new(outbox),
        Arc::new(LogNotifier),
    ])))
}
