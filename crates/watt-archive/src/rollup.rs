//! Cascading 1m → 15m → 1h power rollups

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use watt_core::{
    summarize_children, summarize_samples, RawSampleRepo, Resolution, Rollup, RollupRepo,
    Timestamp, WindowSummary,
};

use crate::ArchiveResult;

/// Which levels to build and where to start when a level is empty
#[derive(Debug, Clone, PartialEq)]
pub struct RollupSettings {
    /// Levels in build order; a disabled level is simply absent
    pub levels: Vec<Resolution>,
    pub lookback_secs: i64,
}

impl Default for RollupSettings {
    fn default() -> Self {
        Self {
            levels: Resolution::ALL.to_vec(),
            lookback_secs: 86_400,
        }
    }
}

/// Outcome of one level within a run
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    pub resolution: Resolution,
    pub windows: usize,
    pub created: usize,
    pub existing: usize,
    pub empty: usize,
    pub failed: usize,
}

impl LevelReport {
    fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            windows: 0,
            created: 0,
            existing: 0,
            empty: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollupReport {
    pub levels: Vec<LevelReport>,
}

impl RollupReport {
    pub fn created(&self) -> usize {
        self.levels.iter().map(|l| l.created).sum()
    }

    pub fn failed(&self) -> usize {
        self.levels.iter().map(|l| l.failed).sum()
    }
}

/// Builds closed windows forward from each level's watermark.
///
/// Rows are written create-if-absent, so overlapping or repeated runs
/// leave exactly one row per (device, resolution, window).
pub struct RollupBuilder<S> {
    store: Arc<S>,
    settings: RollupSettings,
}

impl<S> RollupBuilder<S>
where
    S: RawSampleRepo + RollupRepo,
{
    pub fn new(store: Arc<S>, settings: RollupSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &RollupSettings {
        &self.settings
    }

    /// Replace settings between runs (levels toggled or lookback changed)
    pub fn set_settings(&mut self, settings: RollupSettings) {
        self.settings = settings;
    }

    /// Build every closed window of each enabled level up to `now`.
    ///
    /// Failures are logged per level or per (device, window) and never stop
    /// the rest of the run.
    #[instrument(skip(self))]
    pub async fn build_rollups(&self, now: Timestamp) -> RollupReport {
        let mut report = RollupReport::default();

        for &level in &self.settings.levels {
            let mut level_report = LevelReport::new(level);
            if let Err(e) = self.build_level(level, now, &mut level_report).await {
                error!(resolution = %level, error = %e, "Rollup level aborted");
                level_report.failed += 1;
            }

            if level_report.created > 0 || level_report.failed > 0 {
                info!(
                    resolution = %level,
                    windows = level_report.windows,
                    created = level_report.created,
                    failed = level_report.failed,
                    "Rollup level complete"
                );
            }
            report.levels.push(level_report);
        }

        report
    }

    async fn build_level(
        &self,
        level: Resolution,
        now: Timestamp,
        report: &mut LevelReport,
    ) -> ArchiveResult<()> {
        let step = level.seconds();
        // The window containing `now` is still open
        let end = level.floor(now);

        let mut window = match self.store.latest_window(level).await? {
            Some(last) => level.floor(last) + step,
            None => level.floor(now - self.settings.lookback_secs),
        };

        while window < end {
            self.build_window(level, window, report).await;
            report.windows += 1;
            window += step;
        }

        Ok(())
    }

    async fn build_window(&self, level: Resolution, window: Timestamp, report: &mut LevelReport) {
        let window_end = window + level.seconds();

        let devices = match self.source_devices(level, window, window_end).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(resolution = %level, window_start = window, error = %e, "Failed to list devices");
                report.failed += 1;
                return;
            }
        };

        for device_id in devices {
            match self.build_device_window(level, &device_id, window).await {
                Ok(Some(true)) => report.created += 1,
                Ok(Some(false)) => report.existing += 1,
                Ok(None) => report.empty += 1,
                Err(e) => {
                    warn!(
                        resolution = %level,
                        device_id = %device_id,
                        window_start = window,
                        error = %e,
                        "Failed to build rollup"
                    );
                    report.failed += 1;
                }
            }
        }
    }

    async fn source_devices(
        &self,
        level: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> ArchiveResult<Vec<String>> {
        let devices = match level.source() {
            None => self.store.health_devices(start, end).await?,
            Some(child) => self.store.rollup_devices(child, start, end).await?,
        };
        Ok(devices)
    }

    /// `Ok(None)` when the window has nothing to summarize
    async fn build_device_window(
        &self,
        level: Resolution,
        device_id: &str,
        window: Timestamp,
    ) -> ArchiveResult<Option<bool>> {
        let window_end = window + level.seconds();

        let summary = match level.source() {
            None => {
                let samples = self
                    .store
                    .health_samples(device_id, window, window_end)
                    .await?;
                summarize_samples(&samples)
            }
            Some(child) => {
                let children = self
                    .store
                    .rollups_in_range(device_id, child, window, window_end)
                    .await?;
                summarize_children(&children)
            }
        };

        let Some(summary) = summary else {
            debug!(resolution = %level, device_id, window_start = window, "No data in window");
            return Ok(None);
        };

        let rollup = to_rollup(device_id, level, window, summary);
        Ok(Some(self.store.insert_if_absent(&rollup).await?))
    }
}

fn to_rollup(
    device_id: &str,
    resolution: Resolution,
    window_start: Timestamp,
    summary: WindowSummary,
) -> Rollup {
    Rollup {
        device_id: device_id.to_string(),
        resolution,
        window_start,
        avg_power_w: summary.avg_power_w,
        min_power_w: summary.min_power_w,
        max_power_w: summary.max_power_w,
        energy_kwh: summary.energy_kwh,
    }
}
