//! # Serial Port Layer
//!
//! The framers in this crate are synchronous state machines; this module
//! owns the asynchronous plumbing that feeds them. A [`LinkPort`] is
//! anything that reads and writes bytes (a real UART through
//! `tokio-serial`, or the in-memory [`MockLinkPort`] in tests), and
//! [`LinkHandle`] adds timeout reads and buffered draining on top.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use log::debug;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

#[derive(Error, Debug)]
pub enum LinkIoError {
    #[error("serial port error: {0}")]
    Serial(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Wire configuration for one serial link.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Logical inversion is performed by external hardware; recorded so
    /// the operator sees what the port expects.
    pub inverted: bool,
}

impl SerialConfig {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            parity: Parity::None,
            stop_bits: StopBits::One,
            inverted: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }
}

/// Byte transport for a serial protocol.
#[async_trait::async_trait]
pub trait LinkPort: Send {
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, LinkIoError>;
    async fn write_bytes(&mut self, buf: &[u8]) -> Result<(), LinkIoError>;

    /// Half-duplex turnaround hooks: claim the line before a write burst
    /// and release it afterwards. Full-duplex ports ignore both.
    async fn begin_write(&mut self) -> Result<(), LinkIoError> {
        Ok(())
    }

    async fn end_write(&mut self) -> Result<(), LinkIoError> {
        Ok(())
    }
}

/// Real serial port.
pub struct SerialLinkPort {
    port: tokio_serial::SerialStream,
}

impl SerialLinkPort {
    /// Open `path` with the given configuration.
    pub fn open(path: &str, config: &SerialConfig) -> Result<Self, LinkIoError> {
        let parity = match config.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };
        let stop_bits = match config.stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        };
        let port = tokio_serial::new(path, config.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .open_native_async()
            .map_err(|e| LinkIoError::Serial(e.to_string()))?;
        debug!(
            target: "io",
            "opened {path} at {} baud (inverted: {})", config.baud_rate, config.inverted
        );
        Ok(Self { port })
    }
}

#[async_trait::async_trait]
impl LinkPort for SerialLinkPort {
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, LinkIoError> {
        Ok(self.port.read(buf).await?)
    }

    async fn write_bytes(&mut self, buf: &[u8]) -> Result<(), LinkIoError> {
        self.port.write_all(buf).await?;
        Ok(())
    }
}

/// Loopback port for tests: reads consume what the test queued, writes
/// accumulate for inspection.
#[derive(Default)]
pub struct MockLinkPort {
    pub rx_queue: BytesMut,
    pub tx_data: Vec<u8>,
}

impl MockLinkPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_rx(&mut self, data: &[u8]) {
        self.rx_queue.extend_from_slice(data);
    }
}

#[async_trait::async_trait]
impl LinkPort for MockLinkPort {
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, LinkIoError> {
        let n = self.rx_queue.len().min(buf.len());
        let chunk = self.rx_queue.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }

    async fn write_bytes(&mut self, buf: &[u8]) -> Result<(), LinkIoError> {
        self.tx_data.extend_from_slice(buf);
        Ok(())
    }
}

/// A port plus read buffering and timeouts.
pub struct LinkHandle<P: LinkPort> {
    port: P,
    buf: BytesMut,
}

impl<P: LinkPort> LinkHandle<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            buf: BytesMut::with_capacity(512),
        }
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Read whatever arrives within `timeout`. An elapsed timeout is an
    /// empty read, not an error.
    pub async fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, LinkIoError> {
        let mut chunk = [0u8; 256];
        match tokio::time::timeout(timeout, self.port.read_bytes(&mut chunk)).await {
            Ok(Ok(n)) => {
                self.buf.extend_from_slice(&chunk[..n]);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {}
        }
        Ok(self.buf.split().to_vec())
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), LinkIoError> {
        self.port.begin_write().await?;
        self.port.write_bytes(data).await?;
        self.port.end_write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_port_round_trip() {
        let mut port = MockLinkPort::new();
        port.queue_rx(&[1, 2, 3]);
        let mut handle = LinkHandle::new(port);
        handle.write(&[9, 8]).await.unwrap();
        let data = handle
            .read_available(Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(handle.port_mut().tx_data, vec![9, 8]);
    }

    #[tokio::test]
    async fn test_read_timeout_is_empty() {
        let port = MockLinkPort::new();
        let mut handle = LinkHandle::new(port);
        let data = handle
            .read_available(Duration::from_millis(1))
            .await
            .unwrap();
        assert!(data.is_empty());
    }
}
