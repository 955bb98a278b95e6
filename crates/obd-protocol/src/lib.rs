//! OBD-II Protocol Implementation
//!
//! This crate provides the ELM327 command model, PID definitions and decoding,
//! and the byte-stream transports (serial, TCP, mock) the command queue drives.

mod command;
pub mod decoder;
pub mod elm;
mod error;
pub mod pid;
mod protocol;
pub mod transport;

pub use command::{ObdCommand, ObdRequest, Priority, DTC_PID};
pub use decoder::{decode, decode_response, ParsedPidData};
pub use error::ObdError;
pub use pid::{definition, PidDefinition, ValueKind};
pub use protocol::ObdProtocol;
pub use transport::{create_transport, Transport, TransportConfig, TransportError};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Freeze frame data
    pub const FREEZE_FRAME: u8 = 0x02;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Pending trouble codes
    pub const PENDING_DTC: u8 = 0x07;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
    /// Permanent trouble codes
    pub const PERMANENT_DTC: u8 = 0x0A;
}

/// Current Unix time in milliseconds
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
