//! Validation Error Types

use serde::Serialize;
use thiserror::Error;

/// Basic-check failures; a value carrying one of these is not usable
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum ValidationError {
    /// No PID key
    #[error("PID is empty")]
    EmptyPid,

    /// Nothing came back from the adapter
    #[error("Response is empty")]
    EmptyResponse,

    /// The adapter printed an error token instead of data
    #[error("Adapter reported {0}")]
    AdapterError(String),

    /// The response held no payload after the header
    #[error("No data bytes in response")]
    NoDataBytes,
}

/// Soft findings that lower confidence without invalidating a value
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum ValidationWarning {
    /// Value outside the PID's nominal range
    #[error("{pid} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        pid: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Change since the previous sample is faster than physically plausible
    #[error("{pid} changed by {change:.2} in {elapsed_s:.2}s (limit {limit:.2})")]
    RateExceeded {
        pid: String,
        change: f64,
        elapsed_s: f64,
        limit: f64,
    },

    /// Value far from the recent distribution
    #[error("{pid} value {value} is a statistical outlier (z = {z_score:.2})")]
    Outlier { pid: String, value: f64, z_score: f64 },
}
