//! Table layout and row types for the MySQL store
//!
//! Rollup and daily tables are keyed on (device, window) so that
//! `INSERT IGNORE` / `ON DUPLICATE KEY UPDATE` enforce one row per window.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use watt_core::{
    AlertEvent, AlertRule, AnomalyEvent, Comparator, ConditionKind, DailyEnergy, Metric,
    RawEnergySample, RawHealthSample, Resolution, Rollup,
};

use crate::{DbError, DbResult};

/// `CREATE TABLE IF NOT EXISTS` statements, one per table
pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS raw_health (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        device_id VARCHAR(64) NOT NULL,
        ts BIGINT NOT NULL,
        power_w DOUBLE NULL,
        voltage_v DOUBLE NULL,
        current_a DOUBLE NULL,
        power_factor DOUBLE NULL,
        online TINYINT(1) NOT NULL,
        INDEX idx_raw_health_device_ts (device_id, ts),
        INDEX idx_raw_health_ts (ts)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS raw_energy (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        device_id VARCHAR(64) NOT NULL,
        ts BIGINT NOT NULL,
        cumulative_energy_kwh DOUBLE NOT NULL,
        INDEX idx_raw_energy_device_ts (device_id, ts),
        INDEX idx_raw_energy_ts (ts)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rollup_1m (
        device_id VARCHAR(64) NOT NULL,
        window_start BIGINT NOT NULL,
        avg_power_w DOUBLE NOT NULL,
        min_power_w DOUBLE NOT NULL,
        max_power_w DOUBLE NOT NULL,
        energy_kwh DOUBLE NOT NULL,
        PRIMARY KEY (device_id, window_start),
        INDEX idx_rollup_1m_window (window_start)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rollup_15m (
        device_id VARCHAR(64) NOT NULL,
        window_start BIGINT NOT NULL,
        avg_power_w DOUBLE NOT NULL,
        min_power_w DOUBLE NOT NULL,
        max_power_w DOUBLE NOT NULL,
        energy_kwh DOUBLE NOT NULL,
        PRIMARY KEY (device_id, window_start),
        INDEX idx_rollup_15m_window (window_start)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rollup_1h (
        device_id VARCHAR(64) NOT NULL,
        window_start BIGINT NOT NULL,
        avg_power_w DOUBLE NOT NULL,
        min_power_w DOUBLE NOT NULL,
        max_power_w DOUBLE NOT NULL,
        energy_kwh DOUBLE NOT NULL,
        PRIMARY KEY (device_id, window_start),
        INDEX idx_rollup_1h_window (window_start)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS daily_energy (
        device_id VARCHAR(64) NOT NULL,
        local_day DATE NOT NULL,
        energy_kwh DOUBLE NOT NULL,
        PRIMARY KEY (device_id, local_day)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS alert_rules (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        device_id VARCHAR(64) NOT NULL,
        metric VARCHAR(32) NOT NULL,
        comparator VARCHAR(2) NOT NULL,
        threshold DOUBLE NOT NULL,
        sustained_for_secs BIGINT NOT NULL,
        cooldown_secs BIGINT NOT NULL,
        is_active TINYINT(1) NOT NULL DEFAULT 1,
        last_fired BIGINT NULL,
        INDEX idx_alert_rules_device (device_id, is_active)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS alert_events (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        rule_id BIGINT NOT NULL,
        device_id VARCHAR(64) NOT NULL,
        ts BIGINT NOT NULL,
        observed_value DOUBLE NOT NULL,
        message TEXT NOT NULL,
        INDEX idx_alert_events_device_ts (device_id, ts),
        INDEX idx_alert_events_ts (ts)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS anomaly_events (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        device_id VARCHAR(64) NOT NULL,
        kind VARCHAR(32) NOT NULL,
        ts BIGINT NOT NULL,
        observed_value DOUBLE NOT NULL,
        threshold DOUBLE NULL,
        message TEXT NOT NULL,
        INDEX idx_anomaly_events_device_ts (device_id, ts),
        INDEX idx_anomaly_events_ts (ts)
    )"#,
];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RawHealthRow {
    pub device_id: String,
    pub ts: i64,
    pub power_w: Option<f64>,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
    pub power_factor: Option<f64>,
    pub online: bool,
}

impl From<RawHealthRow> for RawHealthSample {
    fn from(row: RawHealthRow) -> Self {
        RawHealthSample {
            device_id: row.device_id,
            timestamp: row.ts,
            power_w: row.power_w,
            voltage_v: row.voltage_v,
            current_a: row.current_a,
            power_factor: row.power_factor,
            online: row.online,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RawEnergyRow {
    pub device_id: String,
    pub ts: i64,
    pub cumulative_energy_kwh: f64,
}

impl From<RawEnergyRow> for RawEnergySample {
    fn from(row: RawEnergyRow) -> Self {
        RawEnergySample {
            device_id: row.device_id,
            timestamp: row.ts,
            cumulative_energy_kwh: row.cumulative_energy_kwh,
        }
    }
}

/// Row of any rollup table; the table itself determines the resolution
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RollupRow {
    pub device_id: String,
    pub window_start: i64,
    pub avg_power_w: f64,
    pub min_power_w: f64,
    pub max_power_w: f64,
    pub energy_kwh: f64,
}

impl RollupRow {
    pub fn into_rollup(self, resolution: Resolution) -> Rollup {
        Rollup {
            device_id: self.device_id,
            resolution,
            window_start: self.window_start,
            avg_power_w: self.avg_power_w,
            min_power_w: self.min_power_w,
            max_power_w: self.max_power_w,
            energy_kwh: self.energy_kwh,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailyEnergyRow {
    pub device_id: String,
    pub local_day: NaiveDate,
    pub energy_kwh: f64,
}

impl From<DailyEnergyRow> for DailyEnergy {
    fn from(row: DailyEnergyRow) -> Self {
        DailyEnergy {
            device_id: row.device_id,
            local_day: row.local_day,
            energy_kwh: row.energy_kwh,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AlertRuleRow {
    pub id: i64,
    pub name: String,
    pub device_id: String,
    pub metric: String,
    pub comparator: String,
    pub threshold: f64,
    pub sustained_for_secs: i64,
    pub cooldown_secs: i64,
    pub is_active: bool,
    pub last_fired: Option<i64>,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = DbError;

    fn try_from(row: AlertRuleRow) -> DbResult<Self> {
        let metric = Metric::parse(&row.metric).ok_or(DbError::InvalidColumn {
            column: "metric",
            value: row.metric.clone(),
        })?;
        let comparator = Comparator::parse(&row.comparator).ok_or(DbError::InvalidColumn {
            column: "comparator",
            value: row.comparator.clone(),
        })?;

        Ok(AlertRule {
            id: row.id,
            name: row.name,
            device_id: row.device_id,
            metric,
            comparator,
            threshold: row.threshold,
            sustained_for_secs: row.sustained_for_secs,
            cooldown_secs: row.cooldown_secs,
            is_active: row.is_active,
            last_fired: row.last_fired,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AlertEventRow {
    pub id: i64,
    pub rule_id: i64,
    pub device_id: String,
    pub ts: i64,
    pub observed_value: f64,
    pub message: String,
}

impl From<AlertEventRow> for AlertEvent {
    fn from(row: AlertEventRow) -> Self {
        AlertEvent {
            id: row.id,
            rule_id: row.rule_id,
            device_id: row.device_id,
            timestamp: row.ts,
            observed_value: row.observed_value,
            message: row.message,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnomalyEventRow {
    pub id: i64,
    pub device_id: String,
    pub kind: String,
    pub ts: i64,
    pub observed_value: f64,
    pub threshold: Option<f64>,
    pub message: String,
}

impl TryFrom<AnomalyEventRow> for AnomalyEvent {
    type Error = DbError;

    fn try_from(row: AnomalyEventRow) -> DbResult<Self> {
        let kind = ConditionKind::parse(&row.kind).ok_or(DbError::InvalidColumn {
            column: "kind",
            value: row.kind.clone(),
        })?;

        Ok(AnomalyEvent {
            id: row.id,
            device_id: row.device_id,
            kind,
            timestamp: row.ts,
            observed_value: row.observed_value,
            threshold: row.threshold,
            message: row.message,
        })
    }
}

/// Timestamp column used for range filters and retention
pub fn time_column(table: &str) -> &'static str {
    if table.starts_with("rollup_") {
        "window_start"
    } else {
        "ts"
    }
}
