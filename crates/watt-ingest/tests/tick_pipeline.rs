//! Ingest ticks feeding the rollup cascade and the inline detectors

use std::sync::Arc;
use watt_archive::{RollupBuilder, RollupSettings};
use watt_core::memory::{MemoryAnomalyState, MemoryStore};
use watt_core::{
    AlertRuleRepo, Comparator, ConditionKind, DeviceSnapshot, EventRepo, Metric, NewAlertRule,
    NullNotifier, Resolution, Timestamp,
};
use watt_ingest::{DeviceSource, SimulatorSource, TickProcessor};

// 2024-03-01T00:00:00Z
const T0: Timestamp = 1_709_251_200;

fn snapshot(ts: Timestamp, power_w: f64, voltage_v: f64) -> DeviceSnapshot {
    DeviceSnapshot {
        device_id: "plug-1".into(),
        timestamp: ts,
        power_w: Some(power_w),
        voltage_v: Some(voltage_v),
        current_a: Some(power_w / voltage_v),
        power_factor: Some(0.99),
        cumulative_energy_kwh: Some((ts - T0) as f64 * power_w / 3_600_000.0),
        online: true,
    }
}

fn processor(store: &Arc<MemoryStore>) -> TickProcessor<MemoryStore, MemoryAnomalyState> {
    TickProcessor::new(
        Arc::clone(store),
        Arc::new(MemoryAnomalyState::new()),
        Arc::new(NullNotifier),
    )
}

#[tokio::test]
async fn hour_of_constant_load_rolls_up() {
    let store = Arc::new(MemoryStore::new());
    let processor = processor(&store);

    for ts in (T0..T0 + 3600).step_by(10) {
        processor.process(&[snapshot(ts, 120.0, 230.0)]).await;
    }

    let builder = RollupBuilder::new(Arc::clone(&store), RollupSettings::default());
    let report = builder.build_rollups(T0 + 3600).await;
    assert_eq!(report.failed(), 0);

    assert_eq!(store.all_rollups(Resolution::Minute).await.len(), 60);
    assert_eq!(store.all_rollups(Resolution::QuarterHour).await.len(), 4);

    let hours = store.all_rollups(Resolution::Hour).await;
    assert_eq!(hours.len(), 1);
    assert_eq!(hours[0].window_start, T0);
    assert!((hours[0].avg_power_w - 120.0).abs() < 1e-9);
    assert!((hours[0].energy_kwh - 0.12).abs() < 1e-9);

    // Rerunning adds nothing
    let rerun = builder.build_rollups(T0 + 3600).await;
    assert_eq!(rerun.created(), 0);
    assert_eq!(store.all_rollups(Resolution::Hour).await.len(), 1);
}

#[tokio::test]
async fn sag_and_rule_fire_from_ticks() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_rule(&NewAlertRule {
            name: "Brownout".into(),
            device_id: "plug-1".into(),
            metric: Metric::VoltageV,
            comparator: Comparator::Lt,
            threshold: 210.0,
            sustained_for_secs: 3,
            cooldown_secs: 300,
            is_active: true,
        })
        .await
        .unwrap();
    let processor = processor(&store);

    let mut anomalies = 0;
    let mut alerts = 0;
    for ts in T0..=T0 + 6 {
        let report = processor.process(&[snapshot(ts, 80.0, 190.0)]).await;
        anomalies += report.anomalies;
        alerts += report.alerts;
    }

    assert_eq!(anomalies, 1);
    assert_eq!(alerts, 1);

    let events = store.recent_anomaly_events(Some("plug-1"), 10).await.unwrap();
    assert_eq!(events[0].kind, ConditionKind::VoltageSag);
    assert_eq!(events[0].timestamp, T0 + 5);
    insta::assert_snapshot!(events[0].message, @"Voltage sag on plug-1: 190.0 V below 200.0 V for 5s");
}

#[tokio::test]
async fn simulator_feeds_processor() {
    let store = Arc::new(MemoryStore::new());
    let processor = processor(&store);
    let mut source = SimulatorSource::new(3);
    source.start().await.unwrap();

    for ts in (T0..T0 + 120).step_by(10) {
        let snapshots = source.poll(ts).await.unwrap();
        let report = processor.process(&snapshots).await;
        assert_eq!(report.store_failures, 0);
    }

    assert_eq!(store.health_count().await, 36);
    assert_eq!(store.energy_count().await, 36);
}
