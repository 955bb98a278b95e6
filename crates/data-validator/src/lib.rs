//! Data Validation
//!
//! Plausibility checks for decoded OBD-II values: hard basic checks, soft
//! range, rate-of-change and statistical outlier warnings, and a confidence
//! score backed by a bounded rolling history per PID.

mod error;
mod statistics;
mod validator;

pub use error::{ValidationError, ValidationWarning};
pub use validator::{DataValidator, HistoryEntry, ValidationConfig, ValidationResult};
