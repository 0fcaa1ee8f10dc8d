//! Daily energy totals from the cumulative counter

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use watt_core::{
    counter_delta_kwh, days_before, DailyEnergy, DailyEnergyRepo, RawSampleRepo, SiteTimezone,
    Timestamp,
};

use crate::ArchiveResult;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyReport {
    pub devices: usize,
    pub written: usize,
    pub failed: usize,
}

/// Computes one energy total per device per local calendar day.
///
/// Reads raw counter samples directly, not rollups.
pub struct DailyEnergyAggregator<S> {
    store: Arc<S>,
    timezone: SiteTimezone,
}

impl<S> DailyEnergyAggregator<S>
where
    S: RawSampleRepo + DailyEnergyRepo,
{
    pub fn new(store: Arc<S>, timezone: SiteTimezone) -> Self {
        Self { store, timezone }
    }

    pub fn set_timezone(&mut self, timezone: SiteTimezone) {
        self.timezone = timezone;
    }

    /// Compute (or recompute) the totals of `local_day` for every device
    /// with counter samples during that day.
    #[instrument(skip(self))]
    pub async fn compute_daily_energy(&self, local_day: NaiveDate) -> ArchiveResult<DailyReport> {
        let (start, end) = self.timezone.day_bounds(local_day)?;
        let devices = self.store.energy_devices(start, end).await?;

        let mut report = DailyReport {
            devices: devices.len(),
            ..DailyReport::default()
        };

        for device_id in devices {
            match self.compute_device(&device_id, local_day, start, end).await {
                Ok(true) => report.written += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(device_id = %device_id, day = %local_day, error = %e, "Failed to compute daily energy");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn compute_device(
        &self,
        device_id: &str,
        local_day: NaiveDate,
        start: Timestamp,
        end: Timestamp,
    ) -> ArchiveResult<bool> {
        let baseline = self
            .store
            .last_energy_at_or_before(device_id, start)
            .await?
            .map(|s| s.cumulative_energy_kwh)
            .unwrap_or(0.0);

        let Some(last) = self.store.last_energy_at_or_before(device_id, end).await? else {
            return Ok(false);
        };

        let row = DailyEnergy {
            device_id: device_id.to_string(),
            local_day,
            energy_kwh: counter_delta_kwh(baseline, last.cumulative_energy_kwh),
        };
        self.store.upsert_daily(&row).await?;
        Ok(true)
    }

    /// Compute every fully elapsed local day that may be missing or stale.
    ///
    /// The trailing `lookback_days` before today are recomputed on every run,
    /// so a device that failed earlier is retried. A gap older than that
    /// (the day after the newest stored total) is filled too. Stops at
    /// yesterday.
    #[instrument(skip(self))]
    pub async fn catch_up(
        &self,
        now: Timestamp,
        lookback_days: u32,
    ) -> ArchiveResult<Vec<(NaiveDate, DailyReport)>> {
        let today = self.timezone.day_of(now)?;
        let trailing = days_before(today, u64::from(lookback_days))?;
        let mut day = match self.store.latest_day().await? {
            Some(latest) => latest.succ_opt().map_or(trailing, |next| next.min(trailing)),
            None => trailing,
        };

        let mut reports = Vec::new();
        while day < today {
            let report = self.compute_daily_energy(day).await?;
            if report.written > 0 || report.failed > 0 {
                info!(
                    day = %day,
                    written = report.written,
                    failed = report.failed,
                    "Daily energy computed"
                );
            }
            reports.push((day, report));
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watt_core::memory::MemoryStore;
    use watt_core::RawEnergySample;

    // 2024-03-01T00:00:00Z
    const DAY_START: Timestamp = 1_709_251_200;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn utc() -> SiteTimezone {
        SiteTimezone::utc()
    }

    async fn reading(store: &MemoryStore, device: &str, ts: Timestamp, kwh: f64) {
        store
            .append_energy(&RawEnergySample {
                device_id: device.into(),
                timestamp: ts,
                cumulative_energy_kwh: kwh,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_counter_growth_over_day() {
        let store = Arc::new(MemoryStore::new());
        reading(&store, "plug-1", DAY_START - 600, 100.0).await;
        reading(&store, "plug-1", DAY_START + 3600, 101.0).await;
        reading(&store, "plug-1", DAY_START + 80_000, 103.5).await;
        reading(&store, "plug-1", DAY_START + 90_000, 110.0).await;

        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());
        let report = aggregator.compute_daily_energy(day()).await.unwrap();

        assert_eq!(report.written, 1);
        let rows = store.all_daily().await;
        assert_eq!(rows.len(), 1);
        assert!((rows[0].energy_kwh - 3.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_counter_reset_clamps_to_zero() {
        let store = Arc::new(MemoryStore::new());
        reading(&store, "plug-1", DAY_START - 60, 10.0).await;
        reading(&store, "plug-1", DAY_START + 3600, 2.0).await;
        reading(&store, "plug-1", DAY_START + 7200, 6.0).await;

        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());
        aggregator.compute_daily_energy(day()).await.unwrap();

        let rows = store.all_daily().await;
        assert_eq!(rows[0].energy_kwh, 0.0);
    }

    #[tokio::test]
    async fn test_no_prior_reading_uses_zero_baseline() {
        let store = Arc::new(MemoryStore::new());
        reading(&store, "plug-1", DAY_START + 100, 4.0).await;

        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());
        aggregator.compute_daily_energy(day()).await.unwrap();

        assert_eq!(store.all_daily().await[0].energy_kwh, 4.0);
    }

    #[tokio::test]
    async fn test_recompute_overwrites() {
        let store = Arc::new(MemoryStore::new());
        reading(&store, "plug-1", DAY_START - 60, 1.0).await;
        reading(&store, "plug-1", DAY_START + 600, 2.0).await;

        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());
        aggregator.compute_daily_energy(day()).await.unwrap();

        // A late sample arrives for the same day
        reading(&store, "plug-1", DAY_START + 7200, 5.0).await;
        aggregator.compute_daily_energy(day()).await.unwrap();

        let rows = store.all_daily().await;
        assert_eq!(rows.len(), 1);
        assert!((rows[0].energy_kwh - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_local_offset_shifts_boundaries() {
        let store = Arc::new(MemoryStore::new());
        // At +02:00 the local day of March 1st starts at 22:00Z on Feb 29th
        reading(&store, "plug-1", DAY_START - 3 * 3600, 50.0).await;
        reading(&store, "plug-1", DAY_START - 3600, 52.0).await;
        reading(&store, "plug-1", DAY_START + 3600, 53.0).await;

        let plus_two: SiteTimezone = "+02:00".parse().unwrap();
        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), plus_two);
        aggregator.compute_daily_energy(day()).await.unwrap();

        assert!((store.all_daily().await[0].energy_kwh - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_catch_up_stops_before_today() {
        let store = Arc::new(MemoryStore::new());
        for d in 0..4 {
            reading(&store, "plug-1", DAY_START + d * 86_400 + 60, d as f64).await;
        }

        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());
        // Now is midday on March 4th
        let now = DAY_START + 3 * 86_400 + 43_200;
        let reports = aggregator.catch_up(now, 3).await.unwrap();

        let days: Vec<_> = reports.iter().map(|(d, _)| d.to_string()).collect();
        assert_eq!(days, vec!["2024-03-01", "2024-03-02", "2024-03-03"]);
        assert_eq!(store.all_daily().await.len(), 3);

        // Without a trailing window nothing is left until the day rolls over
        assert!(aggregator.catch_up(now, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catch_up_fills_gap_older_than_lookback() {
        let store = Arc::new(MemoryStore::new());
        for d in 0..6 {
            reading(&store, "plug-1", DAY_START + d * 86_400 + 60, d as f64).await;
        }
        store
            .upsert_daily(&DailyEnergy {
                device_id: "plug-1".into(),
                local_day: day(),
                energy_kwh: 0.0,
            })
            .await
            .unwrap();

        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());
        // Now is midday on March 6th; the daemon was down since March 1st
        let reports = aggregator
            .catch_up(DAY_START + 5 * 86_400 + 43_200, 1)
            .await
            .unwrap();

        let days: Vec<_> = reports.iter().map(|(d, _)| d.to_string()).collect();
        assert_eq!(
            days,
            vec!["2024-03-02", "2024-03-03", "2024-03-04", "2024-03-05"]
        );
    }

    #[tokio::test]
    async fn test_failed_device_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        reading(&store, "plug-1", DAY_START + 60, 1.0).await;
        reading(&store, "plug-2", DAY_START + 60, 2.0).await;
        store.fail_writes_for("plug-1").await;

        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());
        let report = aggregator.compute_daily_energy(day()).await.unwrap();

        assert_eq!(
            report,
            DailyReport {
                devices: 2,
                written: 1,
                failed: 1
            }
        );
        let rows = store.all_daily().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_id, "plug-2");
    }

    #[tokio::test]
    async fn test_failed_device_retried_on_next_run() {
        let store = Arc::new(MemoryStore::new());
        reading(&store, "plug-1", DAY_START + 60, 1.0).await;
        reading(&store, "plug-2", DAY_START + 60, 2.0).await;
        store.fail_writes_for("plug-1").await;

        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());
        let now = DAY_START + 86_400 + 600;
        let first = aggregator.catch_up(now, 1).await.unwrap();
        assert_eq!(first[0].1.failed, 1);

        // Another device's row for the same day must not hide the failure
        store.clear_failures().await;
        let second = aggregator.catch_up(now + 3600, 1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].1.written, 2);

        let devices: Vec<_> = store
            .all_daily()
            .await
            .into_iter()
            .map(|row| row.device_id)
            .collect();
        assert_eq!(devices, vec!["plug-1", "plug-2"]);
    }

    #[tokio::test]
    async fn test_catch_up_rejects_huge_lookback() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = DailyEnergyAggregator::new(Arc::clone(&store), utc());

        let result = aggregator.catch_up(DAY_START, u32::MAX).await;
        assert!(matches!(result, Err(crate::ArchiveError::Window(_))));
    }
}
