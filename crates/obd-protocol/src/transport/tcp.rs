//! TCP transport for WiFi adapters

use super::stream::ElmStream;
use super::{Transport, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// ELM327 adapter reachable over TCP
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<ElmStream<TcpStream>>,
}

impl TcpTransport {
    /// Create an unconnected TCP transport
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
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
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        info!("Connecting to adapter at {}:{}", self.host, self.port);
        let socket = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        socket.set_nodelay(true)?;
        self.stream = Some(ElmStream::new(socket));
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
            info!("Disconnecting from {}:{}", self.host, self.port);
            stream.shutdown().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::send_command;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_round_trip_against_fake_adapter() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let adapter = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"010D\r");
            socket.write_all(b"41 0D 3C\r\r>").await.unwrap();
        });

        let mut transport = TcpTransport::new("127.0.0.1", port);
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        let response = send_command(&mut transport, "010D", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(response, "41 0D 3C");

        transport.disconnect().await;
        assert!(!transport.is_connected());
        adapter.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let adapter = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"010C\r");
            tokio::time::sleep(Duration::from_millis(300)).await;
            socket.write_all(b"41 0C 1A F8\r\r>").await.unwrap();

            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"010D\r");
            socket.write_all(b"41 0D 3C\r\r>").await.unwrap();
        });

        let mut transport = TcpTransport::new("127.0.0.1", port);
        transport.connect().await.unwrap();

        let result = send_command(&mut transport, "010C", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        tokio::time::sleep(Duration::from_millis(400)).await;

        let response = send_command(&mut transport, "010D", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(response, "41 0D 3C");
        adapter.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_before_connect_fails() {
        let mut transport = TcpTransport::new("127.0.0.1", 1);
        let result = transport.write(b"ATZ\r").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }
}
