//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Clone, Error)]
pub enum ObdError {
    /// Invalid response from adapter
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Protocol not supported
    #[error("Protocol not supported: {0}")]
    UnsupportedProtocol(String),

    /// PID not supported by vehicle
    #[error("PID {0} not supported by vehicle")]
    PidNotSupported(String),

    /// Adapter setup has not completed
    #[error("OBD adapter is not initialized")]
    NotInitialized,

    /// A step of the ELM327 setup sequence failed
    #[error("Initialization failed at {step}: {reason}")]
    InitializationFailed { step: String, reason: String },

    /// A command exhausted its retries
    #[error("Command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// Command was cancelled before a response was delivered
    #[error("Command {0} was cancelled")]
    Cancelled(u64),

    /// The command queue worker has stopped
    #[error("Command queue is closed")]
    QueueClosed,
}
