//! Core data types for device telemetry, rollups and events

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::window::Resolution;

/// Timestamp type (Unix epoch seconds, UTC)
pub type Timestamp = i64;

/// One health reading from a device, as appended by ingestion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawHealthSample {
    pub device_id: String,

    /// Unix timestamp of observation
    pub timestamp: Timestamp,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_w: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage_v: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_a: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_factor: Option<f64>,

    pub online: bool,
}

impl RawHealthSample {
    /// Value of `metric` in this sample, if the device reported it
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::PowerW => self.power_w,
            Metric::VoltageV => self.voltage_v,
            Metric::CurrentA => self.current_a,
            Metric::PowerFactor => self.power_factor,
        }
    }
}

/// Cumulative energy counter reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEnergySample {
    pub device_id: String,
    pub timestamp: Timestamp,
    pub cumulative_energy_kwh: f64,
}

/// Latest state of one device as delivered by the ingest tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub timestamp: Timestamp,
    pub power_w: Option<f64>,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
    pub power_factor: Option<f64>,
    pub cumulative_energy_kwh: Option<f64>,
    pub online: bool,
}

impl DeviceSnapshot {
    pub fn health_sample(&self) -> RawHealthSample {
        RawHealthSample {
            device_id: self.device_id.clone(),
            timestamp: self.timestamp,
            power_w: self.power_w,
            voltage_v: self.voltage_v,
            current_a: self.current_a,
            power_factor: self.power_factor,
            online: self.online,
        }
    }

    /// Energy sample, only when the device reported its counter
    pub fn energy_sample(&self) -> Option<RawEnergySample> {
        self.cumulative_energy_kwh.map(|kwh| RawEnergySample {
            device_id: self.device_id.clone(),
            timestamp: self.timestamp,
            cumulative_energy_kwh: kwh,
        })
    }
}

/// Pre-aggregated summary of one window at one resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollup {
    pub device_id: String,
    pub resolution: Resolution,

    /// Start of the window, always aligned to `resolution`
    pub window_start: Timestamp,

    pub avg_power_w: f64,
    pub min_power_w: f64,
    pub max_power_w: f64,
    pub energy_kwh: f64,
}

/// Energy consumed by a device over one local calendar day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyEnergy {
    pub device_id: String,
    pub local_day: NaiveDate,
    pub energy_kwh: f64,
}

/// Built-in abnormal conditions watched by the anomaly detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    VoltageSag,
    VoltageSwell,
    LowPowerFactor,
    Connectivity,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::VoltageSag => "voltage-sag",
            ConditionKind::VoltageSwell => "voltage-swell",
            ConditionKind::LowPowerFactor => "low-power-factor",
            ConditionKind::Connectivity => "connectivity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voltage-sag" => Some(ConditionKind::VoltageSag),
            "voltage-swell" => Some(ConditionKind::VoltageSwell),
            "low-power-factor" => Some(ConditionKind::LowPowerFactor),
            "connectivity" => Some(ConditionKind::Connectivity),
            _ => None,
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anomaly firing, before the store has assigned an id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAnomalyEvent {
    pub device_id: String,
    pub kind: ConditionKind,
    pub timestamp: Timestamp,
    pub observed_value: f64,

    /// Threshold that was crossed; connectivity transitions have none
    pub threshold: Option<f64>,

    pub message: String,
}

impl NewAnomalyEvent {
    pub fn with_id(self, id: i64) -> AnomalyEvent {
        AnomalyEvent {
            id,
            device_id: self.device_id,
            kind: self.kind,
            timestamp: self.timestamp,
            observed_value: self.observed_value,
            threshold: self.threshold,
            message: self.message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyEvent {
    pub id: i64,
    pub device_id: String,
    pub kind: ConditionKind,
    pub timestamp: Timestamp,
    pub observed_value: f64,
    pub threshold: Option<f64>,
    pub message: String,
}

/// Sample field an alert rule watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PowerW,
    VoltageV,
    CurrentA,
    PowerFactor,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::PowerW => "power_w",
            Metric::VoltageV => "voltage_v",
            Metric::CurrentA => "current_a",
            Metric::PowerFactor => "power_factor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "power_w" => Some(Metric::PowerW),
            "voltage_v" => Some(Metric::VoltageV),
            "current_a" => Some(Metric::CurrentA),
            "power_factor" => Some(Metric::PowerFactor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl Comparator {
    /// Whether `value <op> threshold` holds
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Gte => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Lte => value <= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::Gte),
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::Lte),
            _ => None,
        }
    }
}

/// User-authored threshold rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub device_id: String,
    pub metric: Metric,
    pub comparator: Comparator,
    pub threshold: f64,
    pub sustained_for_secs: i64,
    pub cooldown_secs: i64,
    pub is_active: bool,
    pub last_fired: Option<Timestamp>,
}

/// Fields supplied by a user when creating a rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAlertRule {
    pub name: String,
    pub device_id: String,
    pub metric: Metric,
    pub comparator: Comparator,
    pub threshold: f64,
    pub sustained_for_secs: i64,
    pub cooldown_secs: i64,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewAlertRule {
    pub fn with_id(self, id: i64) -> AlertRule {
        AlertRule {
            id,
            name: self.name,
            device_id: self.device_id,
            metric: self.metric,
            comparator: self.comparator,
            threshold: self.threshold,
            sustained_for_secs: self.sustained_for_secs,
            cooldown_secs: self.cooldown_secs,
            is_active: self.is_active,
            last_fired: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAlertEvent {
    pub rule_id: i64,
    pub device_id: String,
    pub timestamp: Timestamp,
    pub observed_value: f64,
    pub message: String,
}

impl NewAlertEvent {
    pub fn with_id(self, id: i64) -> AlertEvent {
        AlertEvent {
            id,
            rule_id: self.rule_id,
            device_id: self.device_id,
            timestamp: self.timestamp,
            observed_value: self.observed_value,
            message: self.message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub id: i64,
    pub rule_id: i64,
    pub device_id: String,
    pub timestamp: Timestamp,
    pub observed_value: f64,
    pub message: String,
}

/// Payload handed to push/live-stream collaborators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub device_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Timestamped tables subject to age-based retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTable {
    RawHealth,
    RawEnergy,
    Rollup(Resolution),
    AnomalyEvents,
    AlertEvents,
}

impl DataTable {
    pub fn name(&self) -> &'static str {
        match self {
            DataTable::RawHealth => tables::RAW_HEALTH,
            DataTable::RawEnergy => tables::RAW_ENERGY,
            DataTable::Rollup(resolution) => resolution.table(),
            DataTable::AnomalyEvents => tables::ANOMALY_EVENTS,
            DataTable::AlertEvents => tables::ALERT_EVENTS,
        }
    }
}

/// Table names shared by every store implementation
pub mod tables {
    pub const RAW_HEALTH: &str = "raw_health";
    pub const RAW_ENERGY: &str = "raw_energy";
    pub const ROLLUP_1M: &str = "rollup_1m";
    pub const ROLLUP_15M: &str = "rollup_15m";
    pub const ROLLUP_1H: &str = "rollup_1h";
    pub const DAILY_ENERGY: &str = "daily_energy";
    pub const ALERT_RULES: &str = "alert_rules";
    pub const ALERT_EVENTS: &str = "alert_events";
    pub const ANOMALY_EVENTS: &str = "anomaly_events";
}
