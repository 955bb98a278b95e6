//! Serial transport for USB and Bluetooth RFCOMM adapters

use super::stream::ElmStream;
use super::{Transport, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

/// ELM327 adapter on a serial device node
pub struct SerialTransport {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    device: String,
    /// Baud rate for serial communication
    baud_rate: u32,
    stream: Option<ElmStream<SerialStream>>,
}

impl SerialTransport {
    /// Create an unconnected serial transport
    pub fn new(device: &str, baud_rate: u32) -> Self {
        Self {
            device: device.to_string(),
            baud_rate,
            stream: None,
        }
    }

    /// Forget a stream the peer has closed so the next exchange reconnects
    fn drop_if_disconnected<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(TransportError::Disconnected) = &result {
            warn!("Adapter link {} lost", self.describe());
            self.stream = None;
        }
        result
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        info!("Opening serial port {} at {} baud", self.device, self.baud_rate);
        let port = tokio_serial::new(&self.device, self.baud_rate)
            .open_native_async()
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.device, e)))?;
        self.stream = Some(ElmStream::new(port));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let result = stream.write(data).await;
        self.drop_if_disconnected(result)
    }

    async fn discard_input(&mut self) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let result = stream.discard_input().await;
        self.drop_if_disconnected(result)
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let result = stream.read_line(timeout).await;
        self.drop_if_disconnected(result)
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            info!("Closing serial port {}", self.device);
            stream.shutdown().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("serial://{}@{}", self.device, self.baud_rate)
    }
}
