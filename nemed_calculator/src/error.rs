//! Error types for the emissions pipeline.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NemedError {
    /// Bad caller input: date strings, ranges, granularity or region filters.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested range starts before the table was first published.
    #[error("DATA UNAVAILABLE: {table} is not available prior to {earliest}")]
    UnsupportedRange { table: String, earliest: NaiveDate },

    /// Required data could not be found for the requested range.
    #[error("No data: {0}")]
    NoData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NemedError>;

impl NemedError {
    pub fn validation(msg: impl Into<String>) -> Self {
        NemedError::Validation(msg.into())
    }
}
