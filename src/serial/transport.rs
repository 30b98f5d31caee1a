use std::time::Duration;

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{Result, SerialError};

/// Default baud rate for HC-05 style Bluetooth serial modules
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Byte-stream connection to the device. Object safe so the link layer
/// can run against real hardware or a scripted double in tests.
#[async_trait]
pub trait Transport: Send {
    /// Establish the underlying connection. Opening an already open
    /// transport is a no-op.
    async fn open(&mut self) -> Result<()>;

    /// Release the underlying connection. Idempotent.
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Endpoint label used in logs and error detail
    fn endpoint(&self) -> &str;

    /// Write the whole buffer as one frame
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever bytes are available, waiting at most `wait`.
    /// Returns `Err(Timeout)` when nothing arrived in time.
    async fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize>;

    /// Drop input the OS has buffered but nobody consumed; returns the
    /// number of bytes thrown away.
    async fn discard_input(&mut self) -> Result<usize>;
}

pub struct SerialTransport {
    endpoint: String,
    baud_rate: u32,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(endpoint: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            baud_rate,
            stream: None,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = tokio_serial::new(&self.endpoint, self.baud_rate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| SerialError::OpenFailed {
                endpoint: self.endpoint.clone(),
                detail: e.to_string(),
            })?;

        log::info!("Opened {} at {} baud", self.endpoint, self.baud_rate);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            log::info!("Closed {}", self.endpoint);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(SerialError::Closed)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(SerialError::Closed)?;
        match timeout(wait, stream.read(buf)).await {
            // EOF means the device side of the link went away
            Ok(Ok(0)) => Err(SerialError::Closed),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(SerialError::IoError(e)),
            Err(_) => Err(SerialError::Timeout),
        }
    }

    async fn discard_input(&mut self) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(SerialError::Closed)?;
        let pending = stream.bytes_to_read().unwrap_or(0) as usize;
        stream.clear(ClearBuffer::Input)?;
        Ok(pending)
    }
}
