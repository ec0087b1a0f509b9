//! Custom error types for rustcitedby.
//!
//! Only dataset I/O and configuration failures surface as errors. Per-title
//! lookup failures are folded into [`crate::lookup::LookupOutcome`] and never
//! abort a run.

use thiserror::Error;

/// Main error type for rustcitedby operations.
#[derive(Debug, Error)]
pub enum CitedByError {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading/writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input table lacks a required column
    #[error("Missing required column '{0}'")]
    MissingColumn(String),

    /// A row could not be interpreted
    #[error("Malformed row {row}: {message}")]
    Malformed {
        /// 1-based data row number (header excluded)
        row: usize,
        /// What was wrong with it
        message: String,
    },

    /// HTML parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using `CitedByError`
pub type Result<T> = std::result::Result<T, CitedByError>;
