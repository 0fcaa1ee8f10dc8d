//! Repository implementations over the MySQL tables

use anyhow::{bail, Result};
use chrono::NaiveDate;
use tracing::{debug, instrument};
use watt_core::{
    AlertEvent, AlertRule, AlertRuleRepo, AnomalyEvent, DailyEnergy,
    DailyEnergyRepo, DataTable, EventRepo, NewAlertEvent, NewAlertRule, NewAnomalyEvent,
    RawEnergySample, RawHealthSample, RawSampleRepo, Resolution, RetentionRepo, Rollup,
    RollupRepo, Timestamp,
};

use crate::schema::*;
use crate::DbClient;

#[async_trait::async_trait]
impl RawSampleRepo for DbClient {
    async fn append_health(&self, sample: &RawHealthSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_health (
                device_id, ts, power_w, voltage_v, current_a, power_factor, online
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sample.device_id)
        .bind(sample.timestamp)
        .bind(sample.power_w)
        .bind(sample.voltage_v)
        .bind(sample.current_a)
        .bind(sample.power_factor)
        .bind(sample.online)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn append_energy(&self, sample: &RawEnergySample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_energy (device_id, ts, cumulative_energy_kwh)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&sample.device_id)
        .bind(sample.timestamp)
        .bind(sample.cumulative_energy_kwh)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_samples(
        &self,
        device_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<RawHealthSample>> {
        let rows = sqlx::query_as::<_, RawHealthRow>(
            r#"
            SELECT device_id, ts, power_w, voltage_v, current_a, power_factor, online
            FROM raw_health
            WHERE device_id = ? AND ts >= ? AND ts < ?
            ORDER BY ts ASC
            "#,
        )
        .bind(device_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;

        debug!(
            "Retrieved {} health samples between {} and {}",
            rows.len(),
            start,
            end
        );
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn health_devices(&self, start: Timestamp, end: Timestamp) -> Result<Vec<String>> {
        let devices = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT device_id FROM raw_health WHERE ts >= ? AND ts < ? ORDER BY device_id",
        )
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;
        Ok(devices)
    }

    async fn energy_devices(&self, start: Timestamp, end: Timestamp) -> Result<Vec<String>> {
        let devices = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT device_id FROM raw_energy WHERE ts >= ? AND ts < ? ORDER BY device_id",
        )
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;
        Ok(devices)
    }

    async fn last_energy_at_or_before(
        &self,
        device_id: &str,
        at: Timestamp,
    ) -> Result<Option<RawEnergySample>> {
        let row = sqlx::query_as::<_, RawEnergyRow>(
            r#"
            SELECT device_id, ts, cumulative_energy_kwh
            FROM raw_energy
            WHERE device_id = ? AND ts <= ?
            ORDER BY ts DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(at)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }
}

#[async_trait::async_trait]
impl RollupRepo for DbClient {
    async fn latest_window(&self, resolution: Resolution) -> Result<Option<Timestamp>> {
        let sql = format!("SELECT MAX(window_start) FROM {}", resolution.table());
        let latest = sqlx::query_scalar::<_, Option<i64>>(&sql)
            .fetch_one(self.pool())
            .await?;
        Ok(latest)
    }

    async fn rollup_devices(
        &self,
        resolution: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT device_id FROM {} WHERE window_start >= ? AND window_start < ? ORDER BY device_id",
            resolution.table()
        );
        let devices = sqlx::query_scalar::<_, String>(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(self.pool())
            .await?;
        Ok(devices)
    }

    #[instrument(skip(self))]
    async fn rollups_in_range(
        &self,
        device_id: &str,
        resolution: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Rollup>> {
        let sql = format!(
            r#"
            SELECT device_id, window_start, avg_power_w, min_power_w, max_power_w, energy_kwh
            FROM {}
            WHERE device_id = ? AND window_start >= ? AND window_start < ?
            ORDER BY window_start ASC
            "#,
            resolution.table()
        );
        let rows = sqlx::query_as::<_, RollupRow>(&sql)
            .bind(device_id)
            .bind(start)
            .bind(end)
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_rollup(resolution))
            .collect())
    }

    #[instrument(skip(self, rollup), fields(device_id = %rollup.device_id, window_start = rollup.window_start))]
    async fn insert_if_absent(&self, rollup: &Rollup) -> Result<bool> {
        // The primary key on (device_id, window_start) turns a repeat into a no-op
        let sql = format!(
            r#"
            INSERT IGNORE INTO {} (
                device_id, window_start, avg_power_w, min_power_w, max_power_w, energy_kwh
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
            rollup.resolution.table()
        );
        let result = sqlx::query(&sql)
            .bind(&rollup.device_id)
            .bind(rollup.window_start)
            .bind(rollup.avg_power_w)
            .bind(rollup.min_power_w)
            .bind(rollup.max_power_w)
            .bind(rollup.energy_kwh)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait::async_trait]
impl DailyEnergyRepo for DbClient {
    #[instrument(skip(self, row), fields(device_id = %row.device_id, day = %row.local_day))]
    async fn upsert_daily(&self, row: &DailyEnergy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_energy (device_id, local_day, energy_kwh)
            VALUES (?, ?, ?)
            ON DUPLICATE KEY UPDATE energy_kwh = VALUES(energy_kwh)
            "#,
        )
        .bind(&row.device_id)
        .bind(row.local_day)
        .bind(row.energy_kwh)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn latest_day(&self) -> Result<Option<NaiveDate>> {
        let latest = sqlx::query_scalar::<_, Option<NaiveDate>>(
            "SELECT MAX(local_day) FROM daily_energy",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(latest)
    }

    async fn daily_energy_in_range(
        &self,
        device_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyEnergy>> {
        let rows = sqlx::query_as::<_, DailyEnergyRow>(
            r#"
            SELECT device_id, local_day, energy_kwh
            FROM daily_energy
            WHERE device_id = ? AND local_day >= ? AND local_day <= ?
            ORDER BY local_day ASC
            "#,
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

const RULE_COLUMNS: &str = "id, name, device_id, metric, comparator, threshold, \
    sustained_for_secs, cooldown_secs, is_active, last_fired";

fn rules_from_rows(rows: Vec<AlertRuleRow>) -> Result<Vec<AlertRule>> {
    rows.into_iter()
        .map(|row| AlertRule::try_from(row).map_err(Into::into))
        .collect()
}

#[async_trait::async_trait]
impl AlertRuleRepo for DbClient {
    #[instrument(skip(self, rule), fields(name = %rule.name))]
    async fn create_rule(&self, rule: &NewAlertRule) -> Result<AlertRule> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_rules (
                name, device_id, metric, comparator, threshold,
                sustained_for_secs, cooldown_secs, is_active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.name)
        .bind(&rule.device_id)
        .bind(rule.metric.as_str())
        .bind(rule.comparator.symbol())
        .bind(rule.threshold)
        .bind(rule.sustained_for_secs)
        .bind(rule.cooldown_secs)
        .bind(rule.is_active)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_id() as i64;
        debug!("Created alert rule {}", id);
        Ok(rule.clone().with_id(id))
    }

    async fn update_rule(&self, rule: &AlertRule) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alert_rules SET
                name = ?, device_id = ?, metric = ?, comparator = ?, threshold = ?,
                sustained_for_secs = ?, cooldown_secs = ?, is_active = ?, last_fired = ?
            WHERE id = ?
            "#,
        )
        .bind(&rule.name)
        .bind(&rule.device_id)
        .bind(rule.metric.as_str())
        .bind(rule.comparator.symbol())
        .bind(rule.threshold)
        .bind(rule.sustained_for_secs)
        .bind(rule.cooldown_secs)
        .bind(rule.is_active)
        .bind(rule.last_fired)
        .bind(rule.id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0 || self.get_rule(rule.id).await?.is_some())
    }

    async fn delete_rule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_rule(&self, id: i64) -> Result<Option<AlertRule>> {
        let sql = format!("SELECT {} FROM alert_rules WHERE id = ?", RULE_COLUMNS);
        let row = sqlx::query_as::<_, AlertRuleRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(AlertRule::try_from).transpose()?)
    }

    async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let sql = format!("SELECT {} FROM alert_rules ORDER BY id", RULE_COLUMNS);
        let rows = sqlx::query_as::<_, AlertRuleRow>(&sql)
            .fetch_all(self.pool())
            .await?;
        rules_from_rows(rows)
    }

    async fn active_rules_for_device(&self, device_id: &str) -> Result<Vec<AlertRule>> {
        let sql = format!(
            "SELECT {} FROM alert_rules WHERE device_id = ? AND is_active = 1 ORDER BY id",
            RULE_COLUMNS
        );
        let rows = sqlx::query_as::<_, AlertRuleRow>(&sql)
            .bind(device_id)
            .fetch_all(self.pool())
            .await?;
        rules_from_rows(rows)
    }

    async fn mark_fired(&self, id: i64, at: Timestamp) -> Result<()> {
        let result = sqlx::query("UPDATE alert_rules SET last_fired = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(self.pool())
            .await?;
        // Zero rows also means the value was already `at`
        if result.rows_affected() == 0 && self.get_rule(id).await?.is_none() {
            bail!("alert rule {} not found", id);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventRepo for DbClient {
    #[instrument(skip(self, event), fields(rule_id = event.rule_id))]
    async fn record_alert(&self, event: &NewAlertEvent) -> Result<AlertEvent> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_events (rule_id, device_id, ts, observed_value, message)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.rule_id)
        .bind(&event.device_id)
        .bind(event.timestamp)
        .bind(event.observed_value)
        .bind(&event.message)
        .execute(self.pool())
        .await?;
        Ok(event.clone().with_id(result.last_insert_id() as i64))
    }

    #[instrument(skip(self, event), fields(kind = %event.kind))]
    async fn record_anomaly(&self, event: &NewAnomalyEvent) -> Result<AnomalyEvent> {
        let result = sqlx::query(
            r#"
            INSERT INTO anomaly_events (device_id, kind, ts, observed_value, threshold, message)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.device_id)
        .bind(event.kind.as_str())
        .bind(event.timestamp)
        .bind(event.observed_value)
        .bind(event.threshold)
        .bind(&event.message)
        .execute(self.pool())
        .await?;
        Ok(event.clone().with_id(result.last_insert_id() as i64))
    }

    async fn recent_alert_events(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AlertEvent>> {
        let rows = sqlx::query_as::<_, AlertEventRow>(
            r#"
            SELECT id, rule_id, device_id, ts, observed_value, message
            FROM alert_events
            WHERE (? IS NULL OR device_id = ?)
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn recent_anomaly_events(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnomalyEvent>> {
        let rows = sqlx::query_as::<_, AnomalyEventRow>(
            r#"
            SELECT id, device_id, kind, ts, observed_value, threshold, message
            FROM anomaly_events
            WHERE (? IS NULL OR device_id = ?)
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|row| AnomalyEvent::try_from(row).map_err(Into::into))
            .collect()
    }
}

#[async_trait::async_trait]
impl RetentionRepo for DbClient {
    #[instrument(skip(self))]
    async fn delete_before(&self, table: DataTable, cutoff: Timestamp) -> Result<u64> {
        let name = table.name();
        let sql = format!("DELETE FROM {} WHERE {} < ?", name, time_column(name));
        let result = sqlx::query(&sql)
            .bind(cutoff)
            .execute(self.pool())
            .await?;

        let deleted = result.rows_affected();
        debug!("Deleted {} rows from {} before {}", deleted, name, cutoff);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn delete_days_before(&self, day: NaiveDate) -> Result<u64> {
        let result = sqlx::query("DELETE FROM daily_energy WHERE local_day < ?")
            .bind(day)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connects to `WATT_TEST_DATABASE_URL`; tests return early when unset
    async fn test_client() -> Option<DbClient> {
        let url = std::env::var("WATT_TEST_DATABASE_URL").ok()?;
        let db = DbClient::new(&url, 1).await.unwrap();
        db.init_schema().await.unwrap();
        Some(db)
    }

    #[tokio::test]
    async fn test_mark_fired_unknown_rule_fails() {
        let Some(db) = test_client().await else {
            return;
        };
        assert!(db.mark_fired(i64::MAX, 1_709_251_200).await.is_err());
    }
}
