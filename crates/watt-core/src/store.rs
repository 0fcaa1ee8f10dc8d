//! Repository interfaces the aggregation and detection logic depends on.
//!
//! Ranges are half-open `[start, end)` in Unix seconds unless noted.

use anyhow::Result;
use chrono::NaiveDate;

use crate::types::*;
use crate::window::Resolution;

/// Append-only raw telemetry written by ingestion
#[async_trait::async_trait]
pub trait RawSampleRepo: Send + Sync {
    async fn append_health(&self, sample: &RawHealthSample) -> Result<()>;

    async fn append_energy(&self, sample: &RawEnergySample) -> Result<()>;

    /// Health samples of one device in `[start, end)`, oldest first
    async fn health_samples(
        &self,
        device_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<RawHealthSample>>;

    /// Devices with at least one health sample in `[start, end)`
    async fn health_devices(&self, start: Timestamp, end: Timestamp) -> Result<Vec<String>>;

    /// Devices with at least one energy sample in `[start, end)`
    async fn energy_devices(&self, start: Timestamp, end: Timestamp) -> Result<Vec<String>>;

    /// Most recent counter reading with `timestamp <= at`
    async fn last_energy_at_or_before(
        &self,
        device_id: &str,
        at: Timestamp,
    ) -> Result<Option<RawEnergySample>>;
}

#[async_trait::async_trait]
pub trait RollupRepo: Send + Sync {
    /// Newest window start stored at `resolution`, over all devices
    async fn latest_window(&self, resolution: Resolution) -> Result<Option<Timestamp>>;

    /// Devices with rollups at `resolution` whose window starts in `[start, end)`
    async fn rollup_devices(
        &self,
        resolution: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<String>>;

    /// Rollups of one device whose window starts in `[start, end)`, oldest first
    async fn rollups_in_range(
        &self,
        device_id: &str,
        resolution: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Rollup>>;

    /// Create the row unless one exists for (device, resolution, window).
    ///
    /// Returns `true` when a new row was written.
    async fn insert_if_absent(&self, rollup: &Rollup) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait DailyEnergyRepo: Send + Sync {
    /// Insert or overwrite the total for (device, day)
    async fn upsert_daily(&self, row: &DailyEnergy) -> Result<()>;

    /// Newest day with any stored total
    async fn latest_day(&self) -> Result<Option<NaiveDate>>;

    /// Totals of one device for days in `[from, to]` (inclusive), oldest first
    async fn daily_energy_in_range(
        &self,
        device_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyEnergy>>;
}

#[async_trait::async_trait]
pub trait AlertRuleRepo: Send + Sync {
    async fn create_rule(&self, rule: &NewAlertRule) -> Result<AlertRule>;

    /// Replace a stored rule; returns `false` if no rule has that id
    async fn update_rule(&self, rule: &AlertRule) -> Result<bool>;

    async fn delete_rule(&self, id: i64) -> Result<bool>;

    async fn get_rule(&self, id: i64) -> Result<Option<AlertRule>>;

    async fn list_rules(&self) -> Result<Vec<AlertRule>>;

    async fn active_rules_for_device(&self, device_id: &str) -> Result<Vec<AlertRule>>;

    async fn mark_fired(&self, id: i64, at: Timestamp) -> Result<()>;
}

/// Append-only audit log of alert and anomaly firings
#[async_trait::async_trait]
pub trait EventRepo: Send + Sync {
    async fn record_alert(&self, event: &NewAlertEvent) -> Result<AlertEvent>;

    async fn record_anomaly(&self, event: &NewAnomalyEvent) -> Result<AnomalyEvent>;

    /// Newest first, optionally restricted to one device
    async fn recent_alert_events(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AlertEvent>>;

    /// Newest first, optionally restricted to one device
    async fn recent_anomaly_events(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnomalyEvent>>;
}

#[async_trait::async_trait]
pub trait RetentionRepo: Send + Sync {
    /// Delete rows of `table` with a timestamp before `cutoff`
    async fn delete_before(&self, table: DataTable, cutoff: Timestamp) -> Result<u64>;

    /// Delete daily totals for days before `day`
    async fn delete_days_before(&self, day: NaiveDate) -> Result<u64>;
}

/// Debounce timers of the anomaly detector, keyed by (device, condition).
///
/// Not a source of truth: losing this state only delays the next firing.
/// Deployments running several ingest processes must back it with a shared
/// store.
#[async_trait::async_trait]
pub trait AnomalyStateStore: Send + Sync {
    async fn condition_start(
        &self,
        device_id: &str,
        kind: ConditionKind,
    ) -> Result<Option<Timestamp>>;

    async fn start_condition(&self, device_id: &str, kind: ConditionKind, at: Timestamp)
        -> Result<()>;

    async fn clear_condition(&self, device_id: &str, kind: ConditionKind) -> Result<()>;

    /// Record the latest online flag, returning the one observed before it
    async fn swap_online(&self, device_id: &str, online: bool) -> Result<Option<bool>>;
}
