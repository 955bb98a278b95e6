//! Line framing over any async byte stream

use super::TransportError;
use crate::elm::PROMPT;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

/// Silence that ends a drain of stale input
const DRAIN_QUIET: Duration = Duration::from_millis(5);

/// Buffered adapter stream shared by the serial and TCP transports
pub(crate) struct ElmStream<S> {
    inner: BufStream<S>,
}

impl<S> ElmStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(stream: S) -> Self {
        Self {
            inner: BufStream::new(stream),
        }
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Drop buffered input and anything still arriving, until the link has
    /// been quiet for [`DRAIN_QUIET`]
    pub(crate) async fn discard_input(&mut self) -> Result<usize, TransportError> {
        let mut scratch = [0u8; 256];
        let mut discarded = 0;
        loop {
            match tokio::time::timeout(DRAIN_QUIET, self.inner.read(&mut scratch)).await {
                Err(_) => return Ok(discarded),
                Ok(Ok(0)) => return Err(TransportError::Disconnected),
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    pub(crate) async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        match tokio::time::timeout(timeout, self.read_until_terminator()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn read_until_terminator(&mut self) -> Result<String, TransportError> {
        let mut line = String::new();
        loop {
            match self.inner.read_u8().await? {
                b'\r' | b'\n' => return Ok(line),
                b if b as char == PROMPT => {
                    line.push(PROMPT);
                    return Ok(line);
                }
                // Some clones emit NUL bytes after a reset, and line noise on
                // a serial link shows up as bytes above 0x7F. Adapter output
                // is plain ASCII, so both are dropped.
                0 => continue,
                b if !b.is_ascii() => continue,
                b => line.push(b as char),
            }
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_framing() {
        let (client, mut adapter) = tokio::io::duplex(64);
        let mut stream = ElmStream::new(client);

        adapter.write_all(b"41 0C 1A F8\r\r>").await.unwrap();

        let timeout = Duration::from_secs(1);
        assert_eq!(stream.read_line(timeout).await.unwrap(), "41 0C 1A F8");
        assert_eq!(stream.read_line(timeout).await.unwrap(), "");
        assert_eq!(stream.read_line(timeout).await.unwrap(), ">");
    }

    #[tokio::test]
    async fn test_write_reaches_adapter() {
        let (client, mut adapter) = tokio::io::duplex(64);
        let mut stream = ElmStream::new(client);

        stream.write(b"ATZ\r").await.unwrap();
        let mut buf = [0u8; 4];
        adapter.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ATZ\r");
    }

    #[tokio::test]
    async fn test_non_ascii_bytes_are_dropped() {
        let (client, mut adapter) = tokio::io::duplex(64);
        let mut stream = ElmStream::new(client);

        adapter.write_all(b"\xFFOK\x80\r").await.unwrap();
        assert_eq!(stream.read_line(Duration::from_secs(1)).await.unwrap(), "OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_drops_late_reply() {
        let (client, mut adapter) = tokio::io::duplex(256);
        let mut stream = ElmStream::new(client);

        // Reply to a command the caller already gave up on
        stream.write(b"010C\r").await.unwrap();
        let result = stream.read_line(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransportError::Timeout(100))));
        adapter.write_all(b"41 0C 1A F8\r\r>").await.unwrap();

        assert_eq!(stream.discard_input().await.unwrap(), 14);
        stream.write(b"010D\r").await.unwrap();
        adapter.write_all(b"41 0D 3C\r\r>").await.unwrap();
        assert_eq!(stream.read_line(Duration::from_secs(1)).await.unwrap(), "41 0D 3C");
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_on_quiet_link() {
        let (client, _adapter) = tokio::io::duplex(64);
        let mut stream = ElmStream::new(client);
        assert_eq!(stream.discard_input().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_stream_reports_disconnect() {
        let (client, adapter) = tokio::io::duplex(64);
        let mut stream = ElmStream::new(client);
        drop(adapter);

        let result = stream.read_line(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Disconnected)));
    }
}
