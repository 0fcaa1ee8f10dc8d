//! Simulated smart plugs for local runs and tests

use crate::{DeviceSource, IngestError, IngestResult};
use watt_core::{energy_kwh, DeviceSnapshot, Timestamp};

struct SimDevice {
    id: String,
    base_power_w: f64,
    counter_kwh: f64,
    last_poll: Option<Timestamp>,
}

/// Source that synthesizes a fleet of plugs with slowly varying load
pub struct SimulatorSource {
    devices: Vec<SimDevice>,
    active: bool,
}

impl SimulatorSource {
    pub fn new(device_count: usize) -> Self {
        let devices = (0..device_count)
            .map(|i| SimDevice {
                id: format!("sim-plug-{}", i + 1),
                base_power_w: 60.0 + 40.0 * i as f64,
                counter_kwh: 0.0,
                last_poll: None,
            })
            .collect();
        Self {
            devices,
            active: false,
        }
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.id.clone()).collect()
    }
}

fn snapshot(device: &mut SimDevice, index: usize, now: Timestamp) -> DeviceSnapshot {
    // Pseudo-random variation in [-5, 5)
    let variation = ((now + index as i64 * 37).rem_euclid(100) as f64 / 10.0) - 5.0;
    let power_w = device.base_power_w + variation;
    let voltage_v = 230.0 + variation / 2.0;

    if let Some(last) = device.last_poll {
        device.counter_kwh += energy_kwh(power_w, (now - last).max(0));
    }
    device.last_poll = Some(now);

    DeviceSnapshot {
        device_id: device.id.clone(),
        timestamp: now,
        power_w: Some(power_w),
        voltage_v: Some(voltage_v),
        current_a: Some(power_w / voltage_v),
        power_factor: Some(0.95),
        cumulative_energy_kwh: Some(device.counter_kwh),
        online: true,
    }
}

#[async_trait::async_trait]
impl DeviceSource for SimulatorSource {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn start(&mut self) -> IngestResult<()> {
        if self.active {
            return Err(IngestError::SourceError(
                "Source already started".to_string(),
            ));
        }
        self.active = true;
        tracing::info!("Simulator source started with {} devices", self.devices.len());
        Ok(())
    }

    async fn stop(&mut self) -> IngestResult<()> {
        if !self.active {
            return Err(IngestError::SourceError("Source not started".to_string()));
        }
        self.active = false;
        tracing::info!("Simulator source stopped");
        Ok(())
    }

    async fn poll(&mut self, now: Timestamp) -> IngestResult<Vec<DeviceSnapshot>> {
        if !self.active {
            return Err(IngestError::SourceError("Source not active".to_string()));
        }

        Ok(self
            .devices
            .iter_mut()
            .enumerate()
            .map(|(i, device)| snapshot(device, i, now))
            .collect())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_snapshot;

    #[tokio::test]
    async fn test_simulator_lifecycle() {
        let mut source = SimulatorSource::new(2);

        assert!(!source.is_active());
        assert!(source.poll(0).await.is_err());

        source.start().await.unwrap();
        assert!(source.is_active());

        // Start again should fail
        assert!(source.start().await.is_err());

        source.stop().await.unwrap();
        assert!(!source.is_active());
    }

    #[tokio::test]
    async fn test_counter_accumulates_between_polls() {
        let mut source = SimulatorSource::new(3);
        source.start().await.unwrap();

        let first = source.poll(1_000).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|s| s.cumulative_energy_kwh == Some(0.0)));

        let second = source.poll(4_600).await.unwrap();
        for (before, after) in first.iter().zip(&second) {
            assert_eq!(before.device_id, after.device_id);
            assert!(after.cumulative_energy_kwh > before.cumulative_energy_kwh);
            validate_snapshot(after).unwrap();
        }
        assert_eq!(source.device_ids()[2], "sim-plug-3");
    }
}
