//! Transport error types

use std::io;
use thiserror::Error;

/// Errors raised by a byte-stream transport
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Operation attempted before `connect`
    #[error("Transport is not connected")]
    NotConnected,

    /// Opening the device or socket failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No terminated response within the allotted time
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Read or write failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The adapter closed the stream
    #[error("Connection closed by adapter")]
    Disconnected,
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => TransportError::Disconnected,
            io::ErrorKind::TimedOut => TransportError::Timeout(0),
            _ => TransportError::Io(err.to_string()),
        }
    }
}
