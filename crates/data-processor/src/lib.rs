//! OBD-II Data Processing
//!
//! Turns raw adapter responses into published records:
//! decode → validate → unit-convert → quality-score → publish, with per-PID
//! buffers, running statistics and optional batched persistence.

mod events;
mod processor;
mod quality;
mod sink;
mod stats;
mod units;

pub use events::{BroadcastHub, DataError, DataErrorKind, Subscription};
pub use processor::{DataProcessor, ProcessedObdData, ProcessingMetadata, ProcessorConfig, Session};
pub use quality::DataQuality;
pub use sink::{PersistenceSink, SinkError};
pub use stats::ProcessingStats;
pub use units::{UnitConverter, UnitSystem};
