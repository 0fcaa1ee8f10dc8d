//! Runtime configuration loaded from TOML.
//!
//! Schedulers reload this at the start of every cycle, so edits to the file
//! take effect without a restart.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use watt_core::{DataTable, Resolution, SiteTimezone};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Zone for daily energy boundaries: an IANA name ("Europe/Berlin")
    /// or a fixed offset ("+01:00")
    pub timezone: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    pub enabled: bool,
    pub interval_secs: u64,

    /// How far back the first run starts when a level has no rows yet
    pub lookback_secs: i64,

    pub minute: bool,
    pub quarter_hour: bool,
    pub hour: bool,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            lookback_secs: SECONDS_PER_DAY,
            minute: true,
            quarter_hour: true,
            hour: true,
        }
    }
}

impl RollupConfig {
    /// Enabled levels in build order
    pub fn levels(&self) -> Vec<Resolution> {
        Resolution::ALL
            .into_iter()
            .filter(|res| match res {
                Resolution::Minute => self.minute,
                Resolution::QuarterHour => self.quarter_hour,
                Resolution::Hour => self.hour,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyConfig {
    pub enabled: bool,
    pub interval_secs: u64,

    /// Trailing days recomputed on every run
    pub lookback_days: u32,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            lookback_days: 7,
        }
    }
}

/// Per-table retention in days; `0` keeps rows forever
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub raw_health_days: u32,
    pub raw_energy_days: u32,
    pub rollup_1m_days: u32,
    pub rollup_15m_days: u32,
    pub rollup_1h_days: u32,
    pub daily_energy_days: u32,
    pub anomaly_events_days: u32,
    pub alert_events_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: SECONDS_PER_DAY as u64,
            raw_health_days: 7,
            raw_energy_days: 30,
            rollup_1m_days: 14,
            rollup_15m_days: 90,
            rollup_1h_days: 730,
            daily_energy_days: 0,
            anomaly_events_days: 90,
            alert_events_days: 90,
        }
    }
}

impl RetentionConfig {
    /// Maximum row age in seconds for a timestamped table
    pub fn max_age_secs(&self, table: DataTable) -> Option<i64> {
        let days = match table {
            DataTable::RawHealth => self.raw_health_days,
            DataTable::RawEnergy => self.raw_energy_days,
            DataTable::Rollup(Resolution::Minute) => self.rollup_1m_days,
            DataTable::Rollup(Resolution::QuarterHour) => self.rollup_15m_days,
            DataTable::Rollup(Resolution::Hour) => self.rollup_1h_days,
            DataTable::AnomalyEvents => self.anomaly_events_days,
            DataTable::AlertEvents => self.alert_events_days,
        };
        (days > 0).then(|| i64::from(days) * SECONDS_PER_DAY)
    }

    pub fn daily_energy_max_days(&self) -> Option<u64> {
        (self.daily_energy_days > 0).then(|| u64::from(self.daily_energy_days))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub sag_threshold_v: f64,
    pub sag_duration_secs: i64,
    pub swell_threshold_v: f64,
    pub swell_duration_secs: i64,
    pub low_pf_threshold: f64,
    pub low_pf_duration_secs: i64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            sag_threshold_v: 200.0,
            sag_duration_secs: 5,
            swell_threshold_v: 250.0,
            swell_duration_secs: 5,
            low_pf_threshold: 0.8,
            low_pf_duration_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub rollup: RollupConfig,
    pub daily: DailyConfig,
    pub retention: RetentionConfig,
    pub anomaly: AnomalyConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

impl AppConfig {
    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let cfg = if path.exists() {
            let s = fs::read_to_string(path)?;
            toml::from_str::<AppConfig>(&s)?
        } else {
            AppConfig::default()
        };
        // Surface a bad zone at load time rather than at midnight
        cfg.timezone()?;
        Ok(cfg)
    }

    pub fn timezone(&self) -> Result<SiteTimezone, ConfigError> {
        self.site
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(self.site.timezone.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_every_level() {
        let cfg = AppConfig::default();
        assert_eq!(
            cfg.rollup.levels(),
            vec![Resolution::Minute, Resolution::QuarterHour, Resolution::Hour]
        );
        assert_eq!(cfg.timezone().unwrap(), SiteTimezone::utc());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [site]
            timezone = "+05:30"

            [rollup]
            interval_secs = 30
            hour = false

            [retention]
            raw_health_days = 3
            rollup_1h_days = 0
            "#,
        )
        .unwrap();

        assert_eq!(cfg.timezone().unwrap().to_string(), "+05:30");
        assert_eq!(cfg.rollup.interval_secs, 30);
        assert!(cfg.rollup.enabled);
        assert_eq!(
            cfg.rollup.levels(),
            vec![Resolution::Minute, Resolution::QuarterHour]
        );
        assert_eq!(
            cfg.retention.max_age_secs(DataTable::RawHealth),
            Some(3 * 86_400)
        );
        assert_eq!(
            cfg.retention.max_age_secs(DataTable::Rollup(Resolution::Hour)),
            None
        );
        assert_eq!(cfg.retention.daily_energy_max_days(), None);
        assert_eq!(cfg.anomaly.sag_threshold_v, 200.0);
    }

    #[test]
    fn named_zone_accepted() {
        let cfg: AppConfig = toml::from_str("[site]\ntimezone = \"Europe/Berlin\"\n").unwrap();
        assert_eq!(cfg.timezone().unwrap().to_string(), "Europe/Berlin");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.daily.lookback_days, 7);
    }

    #[test]
    fn bad_timezone_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[site]\ntimezone = \"Mars/Olympus\"\n").unwrap();

        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }
}
