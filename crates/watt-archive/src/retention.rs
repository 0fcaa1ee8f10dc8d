//! Age-based deletion across raw, rollup, daily and event tables

use std::sync::Arc;
use tracing::{info, instrument, warn};
use watt_core::{days_before, tables, DataTable, RetentionRepo, SiteTimezone, Timestamp};

use crate::ArchiveResult;

/// Maximum row age per table; tables without an entry are kept forever
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    max_age_secs: Vec<(DataTable, i64)>,
    daily_energy_days: Option<u64>,
    timezone: SiteTimezone,
}

impl RetentionPolicy {
    pub fn new(timezone: SiteTimezone) -> Self {
        Self {
            max_age_secs: Vec::new(),
            daily_energy_days: None,
            timezone,
        }
    }

    pub fn keep(mut self, table: DataTable, max_age_secs: i64) -> Self {
        self.max_age_secs.retain(|(t, _)| *t != table);
        self.max_age_secs.push((table, max_age_secs));
        self
    }

    pub fn keep_daily_energy(mut self, days: u64) -> Self {
        self.daily_energy_days = Some(days);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub deleted: Vec<(&'static str, u64)>,
    pub failed: Vec<&'static str>,
}

impl SweepReport {
    pub fn total_deleted(&self) -> u64 {
        self.deleted.iter().map(|(_, n)| n).sum()
    }
}

pub struct RetentionSweeper<S> {
    store: Arc<S>,
}

impl<S: RetentionRepo> RetentionSweeper<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Delete expired rows from every table named in `policy`.
    ///
    /// Each table is judged only by its own timestamp column; a failure on
    /// one table does not stop the others.
    #[instrument(skip(self, policy))]
    pub async fn sweep(&self, now: Timestamp, policy: &RetentionPolicy) -> SweepReport {
        let mut report = SweepReport::default();

        for &(table, max_age) in &policy.max_age_secs {
            let cutoff = now.saturating_sub(max_age);
            match self.store.delete_before(table, cutoff).await {
                Ok(deleted) => report.deleted.push((table.name(), deleted)),
                Err(e) => {
                    warn!(table = table.name(), cutoff, error = %e, "Retention sweep failed");
                    report.failed.push(table.name());
                }
            }
        }

        if let Some(days) = policy.daily_energy_days {
            match self.sweep_daily(now, days, &policy.timezone).await {
                Ok(deleted) => report.deleted.push((tables::DAILY_ENERGY, deleted)),
                Err(e) => {
                    warn!(table = tables::DAILY_ENERGY, error = %e, "Retention sweep failed");
                    report.failed.push(tables::DAILY_ENERGY);
                }
            }
        }

        info!(
            deleted = report.total_deleted(),
            failed = report.failed.len(),
            "Retention sweep complete"
        );
        report
    }

    async fn sweep_daily(
        &self,
        now: Timestamp,
        days: u64,
        timezone: &SiteTimezone,
    ) -> ArchiveResult<u64> {
        let cutoff_day = days_before(timezone.day_of(now)?, days)?;
        Ok(self.store.delete_days_before(cutoff_day).await?)
    }
}
