//! Per-tick processing of device snapshots

use std::sync::Arc;
use tracing::{debug, instrument, warn};
use watt_core::{
    AlertRuleRepo, AnomalyStateStore, DeviceSnapshot, EventRepo, Notifier, RawSampleRepo,
};
use watt_detect::{AlertEvaluator, AnomalyDetector, Thresholds};

use crate::validate_snapshot;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub devices: usize,
    pub invalid: usize,
    pub store_failures: usize,
    pub anomalies: usize,
    pub alerts: usize,
}

/// Persists snapshots and runs anomaly detection and alert rules on them.
///
/// Devices are handled one after another; a failure on one device never
/// prevents the next from being processed.
pub struct TickProcessor<S, A> {
    store: Arc<S>,
    detector: AnomalyDetector<S, A>,
    evaluator: AlertEvaluator<S>,
}

impl<S, A> TickProcessor<S, A>
where
    S: RawSampleRepo + AlertRuleRepo + EventRepo,
    A: AnomalyStateStore,
{
    pub fn new(store: Arc<S>, state: Arc<A>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            detector: AnomalyDetector::new(Arc::clone(&store), state, Arc::clone(&notifier)),
            evaluator: AlertEvaluator::new(Arc::clone(&store), notifier),
            store,
        }
    }

    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        if self.detector.thresholds() != &thresholds {
            debug!(?thresholds, "Anomaly thresholds updated");
            self.detector.set_thresholds(thresholds);
        }
    }

    #[instrument(skip(self, snapshots), fields(devices = snapshots.len()))]
    pub async fn process(&self, snapshots: &[DeviceSnapshot]) -> TickReport {
        let mut report = TickReport {
            devices: snapshots.len(),
            ..TickReport::default()
        };
        for snapshot in snapshots {
            self.process_snapshot(snapshot, &mut report).await;
        }
        report
    }

    async fn process_snapshot(&self, snapshot: &DeviceSnapshot, report: &mut TickReport) {
        if let Err(e) = validate_snapshot(snapshot) {
            warn!(error = %e, "Dropping snapshot");
            report.invalid += 1;
            return;
        }

        let health = snapshot.health_sample();
        if let Err(e) = self.store.append_health(&health).await {
            warn!(device_id = %snapshot.device_id, error = %e, "Failed to store health sample");
            report.store_failures += 1;
        }
        if let Some(energy) = snapshot.energy_sample() {
            if let Err(e) = self.store.append_energy(&energy).await {
                warn!(device_id = %snapshot.device_id, error = %e, "Failed to store energy sample");
                report.store_failures += 1;
            }
        }

        report.anomalies += self.detector.observe(&health).await.len();
        report.alerts += self
            .evaluator
            .evaluate_device(&snapshot.device_id, snapshot.timestamp)
            .await
            .len();
    }
}
