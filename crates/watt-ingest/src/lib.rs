//! Device acquisition and the per-tick ingest path
//!
//! A `DeviceSource` yields one snapshot per device per poll; the
//! `TickProcessor` persists each snapshot as raw samples and runs the
//! inline detectors on it.

pub mod simulator;
pub mod tick;

pub use simulator::*;
pub use tick::*;

use thiserror::Error;
use watt_core::{DeviceSnapshot, Timestamp};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Source error: {0}")]
    SourceError(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Trait for anything that can report the current state of a fleet of devices
#[async_trait::async_trait]
pub trait DeviceSource: Send + Sync {
    /// Source name/identifier
    fn name(&self) -> &str;

    async fn start(&mut self) -> IngestResult<()>;

    async fn stop(&mut self) -> IngestResult<()>;

    /// Latest snapshot of every device, stamped `now`
    async fn poll(&mut self, now: Timestamp) -> IngestResult<Vec<DeviceSnapshot>>;

    fn is_active(&self) -> bool;
}

/// Reject snapshots the rest of the pipeline cannot key on
pub fn validate_snapshot(snapshot: &DeviceSnapshot) -> IngestResult<()> {
    if snapshot.device_id.trim().is_empty() {
        return Err(IngestError::InvalidSnapshot("empty device_id".into()));
    }
    if let Some(kwh) = snapshot.cumulative_energy_kwh {
        if !kwh.is_finite() || kwh < 0.0 {
            return Err(IngestError::InvalidSnapshot(format!(
                "{}: energy counter {}",
                snapshot.device_id, kwh
            )));
        }
    }
    Ok(())
}
