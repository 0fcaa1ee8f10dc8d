//! Aggregation of samples and child rollups into window summaries

use serde::{Deserialize, Serialize};

use crate::types::{RawHealthSample, Rollup};
use crate::units::minute_energy_kwh;

/// Aggregation type for rollups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Min,
    Max,
    Sum,
    Avg,
}

/// Accumulator for calculating aggregates over multiple values
#[derive(Debug, Clone)]
pub struct Accumulator {
    observations: Vec<f64>,
    aggregate_type: AggregateType,
}

impl Accumulator {
    pub fn new(aggregate_type: AggregateType) -> Self {
        Self {
            observations: Vec::new(),
            aggregate_type,
        }
    }

    pub fn add(&mut self, value: f64) {
        self.observations.push(value);
    }

    pub fn result(&self) -> Option<f64> {
        if self.observations.is_empty() {
            return None;
        }

        Some(match self.aggregate_type {
            AggregateType::Min => self
                .observations
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min),
            AggregateType::Max => self
                .observations
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max),
            AggregateType::Sum => self.observations.iter().sum(),
            AggregateType::Avg => {
                let sum: f64 = self.observations.iter().sum();
                sum / self.observations.len() as f64
            }
        })
    }

    pub fn count(&self) -> usize {
        self.observations.len()
    }
}

/// Aggregated values of one window, before it is keyed to a device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub avg_power_w: f64,
    pub min_power_w: f64,
    pub max_power_w: f64,
    pub energy_kwh: f64,
}

/// Summarize raw samples of a one-minute window.
///
/// Samples without a power reading are skipped rather than counted as zero.
/// Returns `None` when no sample carries power.
pub fn summarize_samples(samples: &[RawHealthSample]) -> Option<WindowSummary> {
    let mut avg = Accumulator::new(AggregateType::Avg);
    let mut min = Accumulator::new(AggregateType::Min);
    let mut max = Accumulator::new(AggregateType::Max);

    for power in samples.iter().filter_map(|s| s.power_w) {
        avg.add(power);
        min.add(power);
        max.add(power);
    }

    let avg_power_w = avg.result()?;
    Some(WindowSummary {
        avg_power_w,
        min_power_w: min.result()?,
        max_power_w: max.result()?,
        energy_kwh: minute_energy_kwh(avg_power_w),
    })
}

/// Summarize child rollups into their parent window.
///
/// The parent average is the plain mean of child averages, not weighted by
/// how many samples each child saw.
pub fn summarize_children(children: &[Rollup]) -> Option<WindowSummary> {
    let mut avg = Accumulator::new(AggregateType::Avg);
    let mut min = Accumulator::new(AggregateType::Min);
    let mut max = Accumulator::new(AggregateType::Max);
    let mut energy = Accumulator::new(AggregateType::Sum);

    for child in children {
        avg.add(child.avg_power_w);
        min.add(child.min_power_w);
        max.add(child.max_power_w);
        energy.add(child.energy_kwh);
    }

    Some(WindowSummary {
        avg_power_w: avg.result()?,
        min_power_w: min.result()?,
        max_power_w: max.result()?,
        energy_kwh: energy.result()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Resolution;

    fn sample(power_w: Option<f64>) -> RawHealthSample {
        RawHealthSample {
            device_id: "plug-1".into(),
            timestamp: 0,
            power_w,
            voltage_v: Some(230.0),
            current_a: None,
            power_factor: None,
            online: true,
        }
    }

    fn child(avg: f64, min: f64, max: f64, energy: f64) -> Rollup {
        Rollup {
            device_id: "plug-1".into(),
            resolution: Resolution::Minute,
            window_start: 0,
            avg_power_w: avg,
            min_power_w: min,
            max_power_w: max,
            energy_kwh: energy,
        }
    }

    #[test]
    fn test_accumulator_min() {
        let mut acc = Accumulator::new(AggregateType::Min);
        acc.add(10.0);
        acc.add(5.0);
        acc.add(15.0);
        assert_eq!(acc.result(), Some(5.0));
    }

    #[test]
    fn test_accumulator_avg() {
        let mut acc = Accumulator::new(AggregateType::Avg);
        acc.add(10.0);
        acc.add(20.0);
        acc.add(30.0);
        assert_eq!(acc.result(), Some(20.0));
        assert_eq!(acc.count(), 3);
    }

    #[test]
    fn test_accumulator_empty() {
        let acc = Accumulator::new(AggregateType::Sum);
        assert_eq!(acc.result(), None);
    }

    #[test]
    fn test_samples_skip_missing_power() {
        let samples = vec![sample(Some(100.0)), sample(None), sample(Some(200.0))];
        let summary = summarize_samples(&samples).unwrap();

        assert_eq!(summary.avg_power_w, 150.0);
        assert_eq!(summary.min_power_w, 100.0);
        assert_eq!(summary.max_power_w, 200.0);
        assert!((summary.energy_kwh - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn test_samples_without_power_yield_nothing() {
        assert!(summarize_samples(&[sample(None), sample(None)]).is_none());
        assert!(summarize_samples(&[]).is_none());
    }

    #[test]
    fn test_children_use_unweighted_mean() {
        let children = vec![
            child(100.0, 90.0, 110.0, 0.001),
            child(300.0, 250.0, 400.0, 0.005),
        ];
        let summary = summarize_children(&children).unwrap();

        assert_eq!(summary.avg_power_w, 200.0);
        assert_eq!(summary.min_power_w, 90.0);
        assert_eq!(summary.max_power_w, 400.0);
        assert!((summary.energy_kwh - 0.006).abs() < 1e-12);
    }

    #[test]
    fn test_no_children_yield_nothing() {
        assert!(summarize_children(&[]).is_none());
    }
}
