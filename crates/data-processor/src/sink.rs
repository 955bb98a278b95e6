//! Persistence sink seam

use crate::processor::ProcessedObdData;
use async_trait::async_trait;
use thiserror::Error;

/// Errors a persistence sink can report; the processor logs and drops them
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Backend unreachable or closed
    #[error("Persistence unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the batch
    #[error("Persistence rejected batch: {0}")]
    Rejected(String),
}

/// Consumer of processed records, keyed by vehicle and session
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Store a batch of records for one session
    async fn save_batch(
        &self,
        vehicle_id: &str,
        session_id: &str,
        records: &[ProcessedObdData],
    ) -> Result<(), SinkError>;
}
