//! Inline detection on the ingest path
//!
//! The anomaly detector watches every health sample for sustained voltage
//! and power-factor excursions and connectivity changes; the alert
//! evaluator checks user-defined threshold rules over a trailing window.

pub mod alerts;
pub mod anomaly;

pub use alerts::*;
pub use anomaly::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Rule {0} has a negative window or cooldown")]
    InvalidRule(i64),
}

pub type DetectResult<T> = Result<T, DetectError>;
