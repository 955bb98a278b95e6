//! Storage Layer
//!
//! In-memory repository of processed OBD-II records keyed by vehicle and
//! session, usable as the data processor's persistence sink.

mod repository;

pub use repository::{ObdRecord, Repository, SessionSummary};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}
