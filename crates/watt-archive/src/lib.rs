//! Derived-table maintenance
//!
//! Builds cascading power rollups, computes daily energy totals from the
//! cumulative counter, and sweeps expired rows.

pub mod daily;
pub mod retention;
pub mod rollup;

pub use daily::*;
pub use retention::*;
pub use rollup::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Window error: {0}")]
    Window(#[from] watt_core::WindowError),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
