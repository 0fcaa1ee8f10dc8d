//! In-process implementations of the store traits.
//!
//! `MemoryStore` backs tests and throwaway runs; `MemoryAnomalyState` is the
//! anomaly timer store for single-process deployments.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;

use crate::store::*;
use crate::types::*;
use crate::window::Resolution;

#[derive(Default)]
struct MemoryInner {
    health: Vec<RawHealthSample>,
    energy: Vec<RawEnergySample>,
    rollups: BTreeMap<(Resolution, String, Timestamp), Rollup>,
    daily: BTreeMap<(String, NaiveDate), DailyEnergy>,
    rules: BTreeMap<i64, AlertRule>,
    alert_events: Vec<AlertEvent>,
    anomaly_events: Vec<AnomalyEvent>,
    next_rule_id: i64,
    next_event_id: i64,
    failing_devices: HashSet<String>,
    failing_tables: HashSet<String>,
}

impl MemoryInner {
    fn check_device(&self, device_id: &str) -> Result<()> {
        if self.failing_devices.contains(device_id) {
            bail!("injected store failure for device {}", device_id);
        }
        Ok(())
    }

    fn check_table(&self, table: &str) -> Result<()> {
        if self.failing_tables.contains(table) {
            bail!("injected store failure for table {}", table);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write touching `device_id` fail until cleared
    pub async fn fail_writes_for(&self, device_id: &str) {
        self.inner
            .write()
            .await
            .failing_devices
            .insert(device_id.to_string());
    }

    /// Make retention deletes on `table` fail until cleared
    pub async fn fail_sweeps_for(&self, table: &str) {
        self.inner
            .write()
            .await
            .failing_tables
            .insert(table.to_string());
    }

    pub async fn clear_failures(&self) {
        let mut inner = self.inner.write().await;
        inner.failing_devices.clear();
        inner.failing_tables.clear();
    }

    /// Every rollup at `resolution`, ordered by (device, window)
    pub async fn all_rollups(&self, resolution: Resolution) -> Vec<Rollup> {
        self.inner
            .read()
            .await
            .rollups
            .iter()
            .filter(|((res, _, _), _)| *res == resolution)
            .map(|(_, rollup)| rollup.clone())
            .collect()
    }

    pub async fn all_daily(&self) -> Vec<DailyEnergy> {
        self.inner.read().await.daily.values().cloned().collect()
    }

    pub async fn health_count(&self) -> usize {
        self.inner.read().await.health.len()
    }

    pub async fn energy_count(&self) -> usize {
        self.inner.read().await.energy.len()
    }
}

#[async_trait::async_trait]
impl RawSampleRepo for MemoryStore {
    async fn append_health(&self, sample: &RawHealthSample) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_device(&sample.device_id)?;
        inner.health.push(sample.clone());
        Ok(())
    }

    async fn append_energy(&self, sample: &RawEnergySample) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_device(&sample.device_id)?;
        inner.energy.push(sample.clone());
        Ok(())
    }

    async fn health_samples(
        &self,
        device_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<RawHealthSample>> {
        let inner = self.inner.read().await;
        let mut samples: Vec<_> = inner
            .health
            .iter()
            .filter(|s| s.device_id == device_id && s.timestamp >= start && s.timestamp < end)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    async fn health_devices(&self, start: Timestamp, end: Timestamp) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let devices: BTreeSet<_> = inner
            .health
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end)
            .map(|s| s.device_id.clone())
            .collect();
        Ok(devices.into_iter().collect())
    }

    async fn energy_devices(&self, start: Timestamp, end: Timestamp) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let devices: BTreeSet<_> = inner
            .energy
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end)
            .map(|s| s.device_id.clone())
            .collect();
        Ok(devices.into_iter().collect())
    }

    async fn last_energy_at_or_before(
        &self,
        device_id: &str,
        at: Timestamp,
    ) -> Result<Option<RawEnergySample>> {
        let inner = self.inner.read().await;
        // Ties on timestamp resolve to the later append
        Ok(inner
            .energy
            .iter()
            .enumerate()
            .filter(|(_, s)| s.device_id == device_id && s.timestamp <= at)
            .max_by_key(|(i, s)| (s.timestamp, *i))
            .map(|(_, s)| s.clone()))
    }
}

#[async_trait::async_trait]
impl RollupRepo for MemoryStore {
    async fn latest_window(&self, resolution: Resolution) -> Result<Option<Timestamp>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rollups
            .keys()
            .filter(|(res, _, _)| *res == resolution)
            .map(|(_, _, window)| *window)
            .max())
    }

    async fn rollup_devices(
        &self,
        resolution: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let devices: BTreeSet<_> = inner
            .rollups
            .keys()
            .filter(|(res, _, window)| *res == resolution && *window >= start && *window < end)
            .map(|(_, device, _)| device.clone())
            .collect();
        Ok(devices.into_iter().collect())
    }

    async fn rollups_in_range(
        &self,
        device_id: &str,
        resolution: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Rollup>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        let from = (resolution, device_id.to_string(), start);
        let to = (resolution, device_id.to_string(), end);
        Ok(inner
            .rollups
            .range(from..to)
            .map(|(_, rollup)| rollup.clone())
            .collect())
    }

    async fn insert_if_absent(&self, rollup: &Rollup) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.check_device(&rollup.device_id)?;
        let key = (
            rollup.resolution,
            rollup.device_id.clone(),
            rollup.window_start,
        );
        if inner.rollups.contains_key(&key) {
            return Ok(false);
        }
        inner.rollups.insert(key, rollup.clone());
        Ok(true)
    }
}

#[async_trait::async_trait]
impl DailyEnergyRepo for MemoryStore {
    async fn upsert_daily(&self, row: &DailyEnergy) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_device(&row.device_id)?;
        inner
            .daily
            .insert((row.device_id.clone(), row.local_day), row.clone());
        Ok(())
    }

    async fn latest_day(&self) -> Result<Option<NaiveDate>> {
        let inner = self.inner.read().await;
        Ok(inner.daily.keys().map(|(_, day)| *day).max())
    }

    async fn daily_energy_in_range(
        &self,
        device_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyEnergy>> {
        if from > to {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        Ok(inner
            .daily
            .range((device_id.to_string(), from)..=(device_id.to_string(), to))
            .map(|(_, row)| row.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl AlertRuleRepo for MemoryStore {
    async fn create_rule(&self, rule: &NewAlertRule) -> Result<AlertRule> {
        let mut inner = self.inner.write().await;
        inner.next_rule_id += 1;
        let stored = rule.clone().with_id(inner.next_rule_id);
        inner.rules.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_rule(&self, rule: &AlertRule) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_rule(&self, id: i64) -> Result<bool> {
        Ok(self.inner.write().await.rules.remove(&id).is_some())
    }

    async fn get_rule(&self, id: i64) -> Result<Option<AlertRule>> {
        Ok(self.inner.read().await.rules.get(&id).cloned())
    }

    async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self.inner.read().await.rules.values().cloned().collect())
    }

    async fn active_rules_for_device(&self, device_id: &str) -> Result<Vec<AlertRule>> {
        let inner = self.inner.read().await;
        inner.check_device(device_id)?;
        Ok(inner
            .rules
            .values()
            .filter(|r| r.is_active && r.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn mark_fired(&self, id: i64, at: Timestamp) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.rules.get_mut(&id) {
            Some(rule) => {
                rule.last_fired = Some(at);
                Ok(())
            }
            None => bail!("alert rule {} not found", id),
        }
    }
}

#[async_trait::async_trait]
impl EventRepo for MemoryStore {
    async fn record_alert(&self, event: &NewAlertEvent) -> Result<AlertEvent> {
        let mut inner = self.inner.write().await;
        inner.check_device(&event.device_id)?;
        inner.next_event_id += 1;
        let stored = event.clone().with_id(inner.next_event_id);
        inner.alert_events.push(stored.clone());
        Ok(stored)
    }

    async fn record_anomaly(&self, event: &NewAnomalyEvent) -> Result<AnomalyEvent> {
        let mut inner = self.inner.write().await;
        inner.check_device(&event.device_id)?;
        inner.next_event_id += 1;
        let stored = event.clone().with_id(inner.next_event_id);
        inner.anomaly_events.push(stored.clone());
        Ok(stored)
    }

    async fn recent_alert_events(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AlertEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .alert_events
            .iter()
            .rev()
            .filter(|e| device_id.map_or(true, |d| e.device_id == d))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_anomaly_events(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnomalyEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .anomaly_events
            .iter()
            .rev()
            .filter(|e| device_id.map_or(true, |d| e.device_id == d))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl RetentionRepo for MemoryStore {
    async fn delete_before(&self, table: DataTable, cutoff: Timestamp) -> Result<u64> {
        let mut inner = self.inner.write().await;
        inner.check_table(table.name())?;
        let removed = match table {
            DataTable::RawHealth => retain_count(&mut inner.health, |s| s.timestamp >= cutoff),
            DataTable::RawEnergy => retain_count(&mut inner.energy, |s| s.timestamp >= cutoff),
            DataTable::Rollup(resolution) => {
                let before = inner.rollups.len();
                inner
                    .rollups
                    .retain(|(res, _, window), _| *res != resolution || *window >= cutoff);
                before - inner.rollups.len()
            }
            DataTable::AnomalyEvents => {
                retain_count(&mut inner.anomaly_events, |e| e.timestamp >= cutoff)
            }
            DataTable::AlertEvents => {
                retain_count(&mut inner.alert_events, |e| e.timestamp >= cutoff)
            }
        };
        Ok(removed as u64)
    }

    async fn delete_days_before(&self, day: NaiveDate) -> Result<u64> {
        let mut inner = self.inner.write().await;
        inner.check_table(tables::DAILY_ENERGY)?;
        let before = inner.daily.len();
        inner.daily.retain(|(_, d), _| *d >= day);
        Ok((before - inner.daily.len()) as u64)
    }
}

fn retain_count<T>(rows: &mut Vec<T>, keep: impl FnMut(&T) -> bool) -> usize {
    let before = rows.len();
    rows.retain(keep);
    before - rows.len()
}

/// Process-local anomaly timers
#[derive(Default)]
pub struct MemoryAnomalyState {
    starts: RwLock<HashMap<(String, ConditionKind), Timestamp>>,
    online: RwLock<HashMap<String, bool>>,
}

impl MemoryAnomalyState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AnomalyStateStore for MemoryAnomalyState {
    async fn condition_start(
        &self,
        device_id: &str,
        kind: ConditionKind,
    ) -> Result<Option<Timestamp>> {
        let starts = self.starts.read().await;
        Ok(starts.get(&(device_id.to_string(), kind)).copied())
    }

    async fn start_condition(
        &self,
        device_id: &str,
        kind: ConditionKind,
        at: Timestamp,
    ) -> Result<()> {
        self.starts
            .write()
            .await
            .insert((device_id.to_string(), kind), at);
        Ok(())
    }

    async fn clear_condition(&self, device_id: &str, kind: ConditionKind) -> Result<()> {
        self.starts
            .write()
            .await
            .remove(&(device_id.to_string(), kind));
        Ok(())
    }

    async fn swap_online(&self, device_id: &str, online: bool) -> Result<Option<bool>> {
        Ok(self
            .online
            .write()
            .await
            .insert(device_id.to_string(), online))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rollup(device: &str, window_start: Timestamp, avg: f64) -> Rollup {
        Rollup {
            device_id: device.into(),
            resolution: Resolution::Minute,
            window_start,
            avg_power_w: avg,
            min_power_w: avg,
            max_power_w: avg,
            energy_kwh: avg / 60_000.0,
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first_row() {
        let store = MemoryStore::new();

        assert!(store.insert_if_absent(&rollup("a", 60, 100.0)).await.unwrap());
        assert!(!store.insert_if_absent(&rollup("a", 60, 999.0)).await.unwrap());

        let rows = store.all_rollups(Resolution::Minute).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].avg_power_w, 100.0);
    }

    #[tokio::test]
    async fn test_rollups_in_range_is_half_open() {
        let store = MemoryStore::new();
        for window in [0, 60, 120, 180] {
            store.insert_if_absent(&rollup("a", window, 1.0)).await.unwrap();
        }
        store.insert_if_absent(&rollup("b", 60, 1.0)).await.unwrap();

        let rows = store
            .rollups_in_range("a", Resolution::Minute, 60, 180)
            .await
            .unwrap();
        let windows: Vec<_> = rows.iter().map(|r| r.window_start).collect();
        assert_eq!(windows, vec![60, 120]);
    }

    #[tokio::test]
    async fn test_last_energy_at_or_before() {
        let store = MemoryStore::new();
        for (ts, kwh) in [(10, 1.0), (20, 2.0), (30, 3.0)] {
            store
                .append_energy(&RawEnergySample {
                    device_id: "a".into(),
                    timestamp: ts,
                    cumulative_energy_kwh: kwh,
                })
                .await
                .unwrap();
        }

        let at_20 = store.last_energy_at_or_before("a", 20).await.unwrap();
        assert_eq!(at_20.map(|s| s.cumulative_energy_kwh), Some(2.0));
        assert!(store.last_energy_at_or_before("a", 5).await.unwrap().is_none());
        assert!(store.last_energy_at_or_before("b", 50).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rule_lifecycle() {
        let store = MemoryStore::new();
        let rule = store
            .create_rule(&NewAlertRule {
                name: "high draw".into(),
                device_id: "a".into(),
                metric: Metric::PowerW,
                comparator: Comparator::Gt,
                threshold: 2000.0,
                sustained_for_secs: 30,
                cooldown_secs: 300,
                is_active: true,
            })
            .await
            .unwrap();

        assert_eq!(store.active_rules_for_device("a").await.unwrap().len(), 1);

        let mut paused = rule.clone();
        paused.is_active = false;
        assert!(store.update_rule(&paused).await.unwrap());
        assert!(store.active_rules_for_device("a").await.unwrap().is_empty());

        store.mark_fired(rule.id, 42).await.unwrap();
        assert_eq!(
            store.get_rule(rule.id).await.unwrap().unwrap().last_fired,
            Some(42)
        );

        assert!(store.delete_rule(rule.id).await.unwrap());
        assert!(!store.delete_rule(rule.id).await.unwrap());
        assert!(store.mark_fired(rule.id, 43).await.is_err());
    }

    #[tokio::test]
    async fn test_anomaly_state_swap_online() {
        let state = MemoryAnomalyState::new();
        assert_eq!(state.swap_online("a", true).await.unwrap(), None);
        assert_eq!(state.swap_online("a", false).await.unwrap(), Some(true));
        assert_eq!(state.swap_online("b", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_writes_for("a").await;
        assert!(store.insert_if_absent(&rollup("a", 0, 1.0)).await.is_err());
        assert!(store.insert_if_absent(&rollup("b", 0, 1.0)).await.is_ok());

        store.clear_failures().await;
        assert!(store.insert_if_absent(&rollup("a", 0, 1.0)).await.unwrap());
    }
}
