//! Core data types, windowing, and rollup calculations for device telemetry
//!
//! This crate provides the domain model shared by the archive, detection
//! and ingest crates, plus the repository traits they persist through.

pub mod memory;
pub mod pipeline;
pub mod rollups;
pub mod store;
pub mod types;
pub mod units;
pub mod window;

pub use pipeline::*;
pub use rollups::*;
pub use store::*;
pub use types::*;
pub use units::*;
pub use window::*;
