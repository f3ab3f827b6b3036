//! Serial port transport for EnOcean USB sticks
//!
//! USB300-style sticks expose the ESP3 byte stream on a serial port at
//! 57600 baud, 8N1, without flow control.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};
use tracing::{debug, error, info, trace};

use super::Transport;
use crate::config::{GatewayConfig, DEFAULT_BAUD_RATE};
use crate::error::{GatewayError, Result};

/// Serial transport for EnOcean USB sticks
pub struct SerialTransport {
    port_path: PathBuf,
    baud_rate: u32,
    timeout: Duration,
    stream: Option<SerialStream>,
    name: String,
}

impl SerialTransport {
    /// Create a new serial transport with default settings
    pub fn new(port: impl AsRef<Path>) -> Self {
        let port_path = port.as_ref().to_path_buf();
        let name = format!("serial:{}", port_path.display());

        Self {
            port_path,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: GatewayConfig::default().link.read_timeout,
            stream: None,
            name,
        }
    }

    /// Create with custom baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Create with custom read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }

    fn clear_input(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.clear(tokio_serial::ClearBuffer::Input) {
                debug!(error = %e, "Failed to clear serial input buffer");
            }
        }
    }

    fn fail(&mut self, reason: &dyn std::fmt::Display) {
        error!(port = %self.port_path.display(), error = %reason, "Serial I/O error, closing");
        self.stream = None;
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        info!(port = %self.port_path.display(), baud = self.baud_rate, "Opening serial port");

        if !self.port_path.exists() {
            return Err(GatewayError::PortNotFound(
                self.port_path.display().to_string(),
            ));
        }

        let stream = tokio_serial::new(self.port_path.to_string_lossy(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| GatewayError::transport(&self.name, e))?;

        self.stream = Some(stream);
        self.clear_input();

        info!(port = %self.port_path.display(), "Serial port open");
        Ok(())
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(port = %self.port_path.display(), "Closed serial port");
        }
    }

    async fn read(&mut self, n: usize) -> Bytes {
        let deadline = Instant::now() + self.timeout;
        let mut buf = BytesMut::zeroed(n);
        let mut filled = 0;

        while filled < n {
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => {
                    self.fail(&"device disconnected");
                    break;
                }
                Ok(Ok(read)) => filled += read,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Ok(Err(e)) => {
                    self.fail(&e);
                    break;
                }
                Err(_) => break,
            }
        }

        buf.truncate(filled);
        if filled > 0 {
            trace!(bytes = filled, "Read from serial port");
        }
        buf.freeze()
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(GatewayError::NotConnected)?;

        let result = async {
            stream.write_all(data).await?;
            stream.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                trace!(bytes = data.len(), "Wrote to serial port");
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(GatewayError::transport(&self.name, e))
            }
        }
    }

    async fn flush_input(&mut self) {
        self.clear_input();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.stream.is_some())
            .finish()
    }
}
