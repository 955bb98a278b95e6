//! Byte-stream transports for ELM327 adapters
//!
//! The protocol core only needs a half-duplex text stream: write a command
//! terminated by `\r`, then read lines until the `>` prompt. Bluetooth adapters
//! bound to an RFCOMM device node and USB adapters both appear as serial ports;
//! WiFi adapters expose a TCP socket.
//!
//! - [`SerialTransport`] for USB and Bluetooth serial device nodes
//! - [`TcpTransport`] for WiFi adapters
//! - [`MockTransport`] scripted adapter for tests and dry runs

mod error;
pub mod mock;
mod serial;
mod stream;
mod tcp;

pub use error::TransportError;
pub use mock::{MockHandle, MockReply, MockTransport};
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use crate::elm;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Bidirectional text stream to an adapter.
///
/// A transport is owned by exactly one command queue worker, so methods take
/// `&mut self` and implementations need no internal locking.
#[async_trait]
pub trait Transport: Send {
    /// Open the underlying device or socket
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Write raw bytes to the adapter
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Drop input that arrived outside an exchange, such as the tail of a
    /// reply to a command that already timed out. Returns the bytes dropped.
    async fn discard_input(&mut self) -> Result<usize, TransportError>;

    /// Read one line, waiting at most `timeout`.
    ///
    /// A line ends at `\r`, `\n` or the `>` prompt. The terminator is dropped,
    /// except a prompt which is kept so callers can detect the end of a
    /// response.
    async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError>;

    /// Close the stream
    async fn disconnect(&mut self);

    /// Whether `connect` has succeeded and the stream is still open
    fn is_connected(&self) -> bool;

    /// Human readable target, for logs
    fn describe(&self) -> String;
}

/// Send one command and collect its response up to the prompt.
///
/// Stale input is dropped before the command is written, so a late reply to
/// an abandoned command is never read as this command's response. Returns the
/// response with framing removed (see [`elm::clean_response`]).
pub async fn send_command(
    transport: &mut dyn Transport,
    command: &str,
    timeout: Duration,
) -> Result<String, TransportError> {
    let deadline = Instant::now() + timeout;
    let stale = transport.discard_input().await?;
    if stale > 0 {
        debug!("Dropped {} stale bytes before {}", stale, command);
    }
    transport.write(format!("{}\r", command).as_bytes()).await?;

    let mut raw = String::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout(timeout.as_millis() as u64));
        }
        let line = transport.read_line(remaining).await?;
        trace!("<- {:?}", line);
        let done = line.contains(elm::PROMPT);
        raw.push_str(&line);
        raw.push('\n');
        if done {
            break;
        }
    }

    Ok(elm::clean_response(&raw, command))
}

fn default_baud_rate() -> u32 {
    38400
}

/// Which transport to open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// USB or Bluetooth RFCOMM serial device
    Serial {
        /// Device path (e.g., "/dev/ttyUSB0", "/dev/rfcomm0" or "COM3")
        device: String,
        /// Baud rate
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// WiFi adapter socket
    Tcp {
        /// Adapter address (usually "192.168.0.10")
        host: String,
        /// Adapter port (usually 35000)
        port: u16,
    },
    /// Simulated adapter
    Mock,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Mock
    }
}

/// Build an unconnected transport from configuration
pub fn create_transport(config: &TransportConfig) -> Box<dyn Transport> {
    match config {
        TransportConfig::Serial { device, baud_rate } => {
            Box::new(SerialTransport::new(device, *baud_rate))
        }
        TransportConfig::Tcp { host, port } => Box::new(TcpTransport::new(host, *port)),
        TransportConfig::Mock => Box::new(MockTransport::new()),
    }
}
