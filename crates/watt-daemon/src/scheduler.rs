//! Periodic job scheduling with per-cycle configuration reload

use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use watt_config::AppConfig;
use watt_core::Timestamp;

/// Re-reads the TOML file on demand, falling back to the last good copy
pub struct ConfigSource {
    path: PathBuf,
    current: AppConfig,
}

impl ConfigSource {
    pub fn new(path: PathBuf) -> Self {
        let current = match AppConfig::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid configuration, using defaults");
                AppConfig::default()
            }
        };
        Self { path, current }
    }

    pub fn reload(&mut self) -> &AppConfig {
        match AppConfig::load_from(&self.path) {
            Ok(config) => self.current = config,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Invalid configuration, keeping previous");
            }
        }
        &self.current
    }
}

/// Unit of periodic work
#[async_trait::async_trait]
pub trait Job: Send {
    fn name(&self) -> &'static str;

    /// Whether to run this cycle, and the wait before the next one
    fn schedule(&self, config: &AppConfig) -> (bool, Duration);

    async fn run(&mut self, config: &AppConfig, now: Timestamp) -> Result<()>;

    /// Release resources once the scheduler has stopped cycling
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs one job forever, one cycle at a time.
///
/// Enable flag and interval are resolved from a fresh configuration at the
/// start of every cycle. A failed cycle is logged and retried next cycle.
/// Shutdown is only observed between cycles, after which the job's own
/// `shutdown` runs once.
pub struct Scheduler<J> {
    job: J,
    config: ConfigSource,
    shutdown: watch::Receiver<bool>,
}

impl<J: Job> Scheduler<J> {
    pub fn new(job: J, config: ConfigSource, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            job,
            config,
            shutdown,
        }
    }

    /// Run a single cycle and return how long to wait before the next
    pub async fn run_cycle(&mut self, now: Timestamp) -> Duration {
        let config = self.config.reload().clone();
        let (enabled, interval) = self.job.schedule(&config);

        if enabled {
            match self.job.run(&config, now).await {
                Ok(()) => debug!(job = self.job.name(), "Cycle complete"),
                Err(e) => error!(job = self.job.name(), error = %e, "Cycle failed"),
            }
        } else {
            debug!(job = self.job.name(), "Job disabled");
        }

        interval.max(Duration::from_secs(1))
    }

    pub async fn run(mut self) {
        info!(job = self.job.name(), "Scheduler started");

        while !*self.shutdown.borrow() {
            let now = chrono::Utc::now().timestamp();
            let wait = self.run_cycle(now).await;

            tokio::select! {
                _ = sleep(wait) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        if let Err(e) = self.job.shutdown().await {
            warn!(job = self.job.name(), error = %e, "Job shutdown failed");
        }
        info!(job = self.job.name(), "Scheduler stopped");
    }
}
