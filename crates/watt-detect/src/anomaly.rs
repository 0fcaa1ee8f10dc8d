//! Duration-gated anomaly detection
//!
//! Each (device, condition) pair is NORMAL or ACTIVE. A breaching sample
//! moves NORMAL to ACTIVE and remembers when; once the breach has lasted
//! the configured duration one event fires and the pair resets to NORMAL,
//! so a condition that persists re-fires once per duration. Any sample that
//! does not breach (including one missing the reading) resets the pair.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use watt_core::{
    AnomalyEvent, AnomalyStateStore, ConditionKind, EventRepo, NewAnomalyEvent, Notification,
    Notifier, RawHealthSample, Timestamp,
};

use crate::DetectResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub sag_threshold_v: f64,
    pub sag_duration_secs: i64,
    pub swell_threshold_v: f64,
    pub swell_duration_secs: i64,
    pub low_pf_threshold: f64,
    pub low_pf_duration_secs: i64,
}

impl Default for Thresholds {
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

/// A threshold condition evaluated against one sample
struct Gate {
    kind: ConditionKind,
    value: Option<f64>,
    threshold: f64,
    duration_secs: i64,
    breached: bool,
}

impl Gate {
    fn new(
        kind: ConditionKind,
        value: Option<f64>,
        threshold: f64,
        duration_secs: i64,
        breach: impl Fn(f64, f64) -> bool,
    ) -> Self {
        let breached = value.map_or(false, |v| breach(v, threshold));
        Self {
            kind,
            value,
            threshold,
            duration_secs,
            breached,
        }
    }

    fn message(&self, device_id: &str, value: f64) -> String {
        match self.kind {
            ConditionKind::VoltageSag => format!(
                "Voltage sag on {}: {:.1} V below {:.1} V for {}s",
                device_id, value, self.threshold, self.duration_secs
            ),
            ConditionKind::VoltageSwell => format!(
                "Voltage swell on {}: {:.1} V above {:.1} V for {}s",
                device_id, value, self.threshold, self.duration_secs
            ),
            ConditionKind::LowPowerFactor => format!(
                "Low power factor on {}: {:.2} below {:.2} for {}s",
                device_id, value, self.threshold, self.duration_secs
            ),
            ConditionKind::Connectivity => format!("Connectivity change on {}", device_id),
        }
    }
}

fn title(kind: ConditionKind) -> &'static str {
    match kind {
        ConditionKind::VoltageSag => "Voltage sag",
        ConditionKind::VoltageSwell => "Voltage swell",
        ConditionKind::LowPowerFactor => "Low power factor",
        ConditionKind::Connectivity => "Connectivity",
    }
}

pub struct AnomalyDetector<E, A> {
    events: Arc<E>,
    state: Arc<A>,
    notifier: Arc<dyn Notifier>,
    thresholds: Thresholds,
}

impl<E, A> AnomalyDetector<E, A>
where
    E: EventRepo,
    A: AnomalyStateStore,
{
    pub fn new(events: Arc<E>, state: Arc<A>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            events,
            state,
            notifier,
            thresholds: Thresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    /// Feed one health sample through every condition.
    ///
    /// Returns the events fired by this sample. A failure on one condition
    /// is logged and the remaining conditions are still evaluated.
    #[instrument(skip(self, sample), fields(device_id = %sample.device_id, ts = sample.timestamp))]
    pub async fn observe(&self, sample: &RawHealthSample) -> Vec<AnomalyEvent> {
        let t = &self.thresholds;
        let gates = [
            Gate::new(
                ConditionKind::VoltageSag,
                sample.voltage_v,
                t.sag_threshold_v,
                t.sag_duration_secs,
                |v, th| v < th,
            ),
            Gate::new(
                ConditionKind::VoltageSwell,
                sample.voltage_v,
                t.swell_threshold_v,
                t.swell_duration_secs,
                |v, th| v > th,
            ),
            Gate::new(
                ConditionKind::LowPowerFactor,
                sample.power_factor,
                t.low_pf_threshold,
                t.low_pf_duration_secs,
                |v, th| v < th,
            ),
        ];

        let mut fired = Vec::new();
        for gate in &gates {
            match self.check_gate(sample, gate).await {
                Ok(Some(event)) => fired.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!(kind = %gate.kind, error = %e, "Anomaly check failed");
                }
            }
        }

        match self.check_connectivity(sample).await {
            Ok(Some(event)) => fired.push(event),
            Ok(None) => {}
            Err(e) => {
                warn!(kind = %ConditionKind::Connectivity, error = %e, "Anomaly check failed");
            }
        }

        fired
    }

    async fn check_gate(
        &self,
        sample: &RawHealthSample,
        gate: &Gate,
    ) -> DetectResult<Option<AnomalyEvent>> {
        let device_id = sample.device_id.as_str();

        let value = match gate.value {
            Some(v) if gate.breached => v,
            _ => {
                self.state.clear_condition(device_id, gate.kind).await?;
                return Ok(None);
            }
        };

        let start = match self.state.condition_start(device_id, gate.kind).await? {
            Some(start) => start,
            None => {
                debug!(kind = %gate.kind, value, "Condition entered");
                self.state
                    .start_condition(device_id, gate.kind, sample.timestamp)
                    .await?;
                sample.timestamp
            }
        };

        if sample.timestamp - start < gate.duration_secs {
            return Ok(None);
        }

        let event = NewAnomalyEvent {
            device_id: device_id.to_string(),
            kind: gate.kind,
            timestamp: sample.timestamp,
            observed_value: value,
            threshold: Some(gate.threshold),
            message: gate.message(device_id, value),
        };
        let stored = self.fire(event).await?;
        self.state.clear_condition(device_id, gate.kind).await?;
        Ok(Some(stored))
    }

    async fn check_connectivity(
        &self,
        sample: &RawHealthSample,
    ) -> DetectResult<Option<AnomalyEvent>> {
        let device_id = sample.device_id.as_str();
        let previous = self.state.swap_online(device_id, sample.online).await?;

        match previous {
            Some(was_online) if was_online != sample.online => {
                let message = if sample.online {
                    format!("{} is back online", device_id)
                } else {
                    format!("{} went offline", device_id)
                };
                let event = NewAnomalyEvent {
                    device_id: device_id.to_string(),
                    kind: ConditionKind::Connectivity,
                    timestamp: sample.timestamp,
                    observed_value: if sample.online { 1.0 } else { 0.0 },
                    threshold: None,
                    message,
                };
                Ok(Some(self.fire(event).await?))
            }
            _ => Ok(None),
        }
    }

    /// Record the audit row, then notify without letting delivery fail the firing
    async fn fire(&self, event: NewAnomalyEvent) -> DetectResult<AnomalyEvent> {
        let stored = self.events.record_anomaly(&event).await?;
        info!(
            device_id = %stored.device_id,
            kind = %stored.kind,
            observed = stored.observed_value,
            "Anomaly fired"
        );

        let notification = Notification {
            title: title(stored.kind).to_string(),
            body: stored.message.clone(),
            device_id: stored.device_id.clone(),
            url: None,
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(device_id = %stored.device_id, error = %e, "Anomaly notification failed");
        }

        Ok(stored)
    }
}
