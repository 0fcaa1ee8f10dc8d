//! MySQL storage for raw samples, rollups, daily totals, rules and events
//!
//! Every derived table carries a primary key on its window so repeated or
//! concurrent writers cannot create duplicates.

pub mod client;
pub mod queries;
pub mod schema;

pub use client::*;
pub use schema::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid value in column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },
}

pub type DbResult<T> = Result<T, DbError>;
