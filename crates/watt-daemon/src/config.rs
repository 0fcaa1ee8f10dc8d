//! Daemon bootstrap configuration from environment variables

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// MySQL database connection URL
    pub database_url: String,

    /// Connection pool size (default: 5)
    pub max_connections: u32,

    /// Seconds between device polls (default: 10)
    pub poll_interval: u64,

    /// Number of simulated devices (default: 3)
    pub sim_devices: usize,

    /// Directory of the notification outbox; notifications are only logged when unset
    pub notify_outbox: Option<PathBuf>,

    /// Runtime TOML configuration, re-read every scheduler cycle
    pub config_path: PathBuf,
}

impl DaemonConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;

        let max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("Invalid DB_MAX_CONNECTIONS")?;

        let poll_interval = env::var("POLL_INTERVAL")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("Invalid POLL_INTERVAL")?;

        let sim_devices = env::var("SIM_DEVICES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("Invalid SIM_DEVICES")?;

        let notify_outbox = env::var("NOTIFY_OUTBOX").ok().map(PathBuf::from);
        let config_path =
            PathBuf::from(env::var("WATT_CONFIG").unwrap_or_else(|_| "config.toml".to_string()));

        Ok(Self {
            database_url,
            max_connections,
            poll_interval,
            sim_devices,
            notify_outbox,
            config_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        env::set_var("DATABASE_URL", "mysql://localhost/watt");

        let config = DaemonConfig::from_env().unwrap();

        assert_eq!(config.max_connections, 5);
        assert_eq!(config.poll_interval, 10);
        assert_eq!(config.sim_devices, 3);
        assert_eq!(config.config_path, PathBuf::from("config.toml"));
        assert!(config.notify_outbox.is_none());

        env::remove_var("DATABASE_URL");
    }
}
