//! Scheduled jobs: ingest polling, rollups, daily energy and retention

use anyhow::{Context, Result};
use tokio::time::Duration;
use tracing::{debug, info, warn};
use watt_archive::{
    DailyEnergyAggregator, RetentionPolicy, RetentionSweeper, RollupBuilder, RollupSettings,
};
use watt_config::{AnomalyConfig, AppConfig};
use watt_core::{
    AlertRuleRepo, AnomalyStateStore, DailyEnergyRepo, DataTable, EventRepo, RawSampleRepo,
    Resolution, RetentionRepo, RollupRepo, Timestamp,
};
use watt_detect::Thresholds;
use watt_ingest::{DeviceSource, TickProcessor};

use crate::scheduler::Job;

pub fn thresholds(config: &AnomalyConfig) -> Thresholds {
    Thresholds {
        sag_threshold_v: config.sag_threshold_v,
        sag_duration_secs: config.sag_duration_secs,
        swell_threshold_v: config.swell_threshold_v,
        swell_duration_secs: config.swell_duration_secs,
        low_pf_threshold: config.low_pf_threshold,
        low_pf_duration_secs: config.low_pf_duration_secs,
    }
}

pub fn retention_policy(config: &AppConfig) -> Result<RetentionPolicy> {
    let retention = &config.retention;
    let mut policy = RetentionPolicy::new(config.timezone()?);

    let tables = [
        DataTable::RawHealth,
        DataTable::RawEnergy,
        DataTable::Rollup(Resolution::Minute),
        DataTable::Rollup(Resolution::QuarterHour),
        DataTable::Rollup(Resolution::Hour),
        DataTable::AnomalyEvents,
        DataTable::AlertEvents,
    ];
    for table in tables {
        if let Some(max_age) = retention.max_age_secs(table) {
            policy = policy.keep(table, max_age);
        }
    }
    if let Some(days) = retention.daily_energy_max_days() {
        policy = policy.keep_daily_energy(days);
    }
    Ok(policy)
}

/// Polls the device source and pushes every snapshot through the tick processor
pub struct IngestJob<S, A> {
    source: Box<dyn DeviceSource>,
    processor: TickProcessor<S, A>,
    poll_interval: Duration,
}

impl<S, A> IngestJob<S, A> {
    pub fn new(
        source: Box<dyn DeviceSource>,
        processor: TickProcessor<S, A>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            processor,
            poll_interval,
        }
    }
}

#[async_trait::async_trait]
impl<S, A> Job for IngestJob<S, A>
where
    S: RawSampleRepo + AlertRuleRepo + EventRepo + 'static,
    A: AnomalyStateStore + 'static,
{
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn schedule(&self, _config: &AppConfig) -> (bool, Duration) {
        (true, self.poll_interval)
    }

    async fn run(&mut self, config: &AppConfig, now: Timestamp) -> Result<()> {
        self.processor.set_thresholds(thresholds(&config.anomaly));

        let snapshots = self
            .source
            .poll(now)
            .await
            .with_context(|| format!("Failed to poll {}", self.source.name()))?;
        let report = self.processor.process(&snapshots).await;

        debug!(
            devices = report.devices,
            anomalies = report.anomalies,
            alerts = report.alerts,
            "Tick processed"
        );
        if report.store_failures > 0 || report.invalid > 0 {
            warn!(
                store_failures = report.store_failures,
                invalid = report.invalid,
                "Tick completed with errors"
            );
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.source
            .stop()
            .await
            .with_context(|| format!("Failed to stop {}", self.source.name()))?;
        info!(source = self.source.name(), "Device source stopped");
        Ok(())
    }
}

pub struct RollupJob<S> {
    builder: RollupBuilder<S>,
}

impl<S> RollupJob<S>
where
    S: RawSampleRepo + RollupRepo,
{
    pub fn new(builder: RollupBuilder<S>) -> Self {
        Self { builder }
    }
}

#[async_trait::async_trait]
impl<S> Job for RollupJob<S>
where
    S: RawSampleRepo + RollupRepo + 'static,
{
    fn name(&self) -> &'static str {
        "rollup"
    }

    fn schedule(&self, config: &AppConfig) -> (bool, Duration) {
        (
            config.rollup.enabled,
            Duration::from_secs(config.rollup.interval_secs),
        )
    }

    async fn run(&mut self, config: &AppConfig, now: Timestamp) -> Result<()> {
        self.builder.set_settings(RollupSettings {
            levels: config.rollup.levels(),
            lookback_secs: config.rollup.lookback_secs,
        });

        let report = self.builder.build_rollups(now).await;
        if report.created() > 0 || report.failed() > 0 {
            info!(
                created = report.created(),
                failed = report.failed(),
                "Rollup run complete"
            );
        }
        Ok(())
    }
}

pub struct DailyJob<S> {
    aggregator: DailyEnergyAggregator<S>,
}

impl<S> DailyJob<S>
where
    S: RawSampleRepo + DailyEnergyRepo,
{
    pub fn new(aggregator: DailyEnergyAggregator<S>) -> Self {
        Self { aggregator }
    }
}

#[async_trait::async_trait]
impl<S> Job for DailyJob<S>
where
    S: RawSampleRepo + DailyEnergyRepo + 'static,
{
    fn name(&self) -> &'static str {
        "daily-energy"
    }

    fn schedule(&self, config: &AppConfig) -> (bool, Duration) {
        (
            config.daily.enabled,
            Duration::from_secs(config.daily.interval_secs),
        )
    }

    async fn run(&mut self, config: &AppConfig, now: Timestamp) -> Result<()> {
        self.aggregator.set_timezone(config.timezone()?);
        let days = self
            .aggregator
            .catch_up(now, config.daily.lookback_days)
            .await?;
        let failed: usize = days.iter().map(|(_, report)| report.failed).sum();
        if failed > 0 {
            warn!(days = days.len(), failed, "Daily energy catch-up had failures");
        }
        Ok(())
    }
}

pub struct RetentionJob<S> {
    sweeper: RetentionSweeper<S>,
}

impl<S: RetentionRepo> RetentionJob<S> {
    pub fn new(sweeper: RetentionSweeper<S>) -> Self {
        Self { sweeper }
    }
}

#[async_trait::async_trait]
impl<S> Job for RetentionJob<S>
where
    S: RetentionRepo + 'static,
{
    fn name(&self) -> &'static str {
        "retention"
    }

    fn schedule(&self, config: &AppConfig) -> (bool, Duration) {
        (
            config.retention.enabled,
            Duration::from_secs(config.retention.interval_secs),
        )
    }

    async fn run(&mut self, config: &AppConfig, now: Timestamp) -> Result<()> {
        let policy = retention_policy(config)?;
        let report = self.sweeper.sweep(now, &policy).await;
        if !report.failed.is_empty() {
            warn!(tables = ?report.failed, "Retention skipped some tables");
        }
        Ok(())
    }
}
