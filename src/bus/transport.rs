//! Transport abstraction with dependency injection
//!
//! The protocol engine talks to the bus through the [`Transport`] trait and
//! obtains transports through a [`Connector`]. [`StreamTransport`] adapts any
//! async byte stream (a real serial port or a mock) to the trait.

use crate::constants::RX_BUFFER_LEN;
use crate::error::BusError;
use crate::logging::log_frame_hex;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A half-duplex byte link to the bus.
#[async_trait]
pub trait Transport: Send {
    /// Writes a complete frame.
    async fn send(&mut self, data: &[u8]) -> Result<(), BusError>;

    /// Performs one read of at most [`RX_BUFFER_LEN`] bytes.
    ///
    /// Returns [`BusError::Timeout`] if nothing arrives within `timeout`.
    async fn receive(&mut self, timeout: Duration) -> Result<Bytes, BusError>;

    /// Releases the link. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), BusError>;
}

/// Opens transports for a device path.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn open(&self, path: &str) -> Result<Self::Transport, BusError>;
}

/// Transport over any port implementing tokio's async I/O traits.
pub struct StreamTransport<P> {
    port: Option<P>,
}

impl<P> StreamTransport<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(port: P) -> Self {
        StreamTransport { port: Some(port) }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port(&mut self) -> Result<&mut P, BusError> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed").into())
    }
}

#[async_trait]
impl<P> Transport for StreamTransport<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<(), BusError> {
        log_frame_hex("TX", data);
        let port = self.port()?;
        port.write_all(data).await?;
        port.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Bytes, BusError> {
        let port = self.port()?;
        let mut buf = vec![0u8; RX_BUFFER_LEN];
        let n = tokio::time::timeout(timeout, port.read(&mut buf))
            .await
            .map_err(|_| BusError::Timeout)??;
        if n == 0 {
            return Err(BusError::EmptyResponse);
        }
        buf.truncate(n);
        log_frame_hex("RX", &buf);
        Ok(Bytes::from(buf))
    }

    async fn close(&mut self) -> Result<(), BusError> {
        if let Some(mut port) = self.port.take() {
            port.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::frame::{decode_response, encode_request, encode_response};
    use crate::bus::serial_mock::MockSerialPort;
    use crate::constants::ACK;

    #[tokio::test]
    async fn test_send_writes_frame() {
        let mock = MockSerialPort::new();
        let mut transport = StreamTransport::new(mock.clone());

        let frame = encode_request("SN ?", 0x05).unwrap();
        transport.send(&frame).await.unwrap();

        assert_eq!(mock.get_tx_data(), frame.to_vec());
    }

    #[tokio::test]
    async fn test_receive_reads_queued_frame() {
        let mock = MockSerialPort::new();
        let reply = encode_response(ACK, "21.7").unwrap();
        mock.queue_rx_data(&reply);

        let mut transport = StreamTransport::new(mock.clone());
        let raw = transport.receive(Duration::from_millis(100)).await.unwrap();

        assert_eq!(decode_response(&raw).unwrap().payload, "21.7");
    }

    #[tokio::test]
    async fn test_receive_caps_at_rx_buffer() {
        let mock = MockSerialPort::new();
        mock.queue_rx_data(&vec![b'A'; RX_BUFFER_LEN + 10]);

        let mut transport = StreamTransport::new(mock.clone());
        let raw = transport.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(raw.len(), RX_BUFFER_LEN);
    }

    #[tokio::test]
    async fn test_receive_empty() {
        let mock = MockSerialPort::new();
        let mut transport = StreamTransport::new(mock);

        let result = transport.receive(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(BusError::EmptyResponse)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout() {
        let mock = MockSerialPort::new();
        mock.set_silent(true);
        let mut transport = StreamTransport::new(mock);

        let result = transport.receive(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(BusError::Timeout)));
    }

    #[tokio::test]
    async fn test_error_propagation() {
        let mock = MockSerialPort::new();
        mock.set_next_error(io::Error::new(io::ErrorKind::BrokenPipe, "Test error"));

        let mut transport = StreamTransport::new(mock);
        let result = transport.send(&[0x81, 0x03, 0x03]).await;
        assert!(matches!(result, Err(BusError::Io(_))));
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let mut transport = StreamTransport::new(MockSerialPort::new());
        transport.close().await.unwrap();
        assert!(!transport.is_open());
        transport.close().await.unwrap();

        let result = transport.send(&[0x81]).await;
        assert!(matches!(result, Err(BusError::Io(_))));
    }
}
