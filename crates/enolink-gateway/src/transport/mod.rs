//! Byte transports to the gateway
//!
//! - [`TcpTransport`] - network gateways and ser2net bridges
//! - [`SerialTransport`] - USB sticks (requires `serial` feature)
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   # Ubuntu/Debian
//!   apt install libudev-dev pkg-config
//!   ```

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;

mod tcp;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::GatewayConfig;
use crate::error::Result;

#[cfg(not(feature = "serial"))]
use crate::config::ConnectionConfig;
#[cfg(not(feature = "serial"))]
use crate::error::GatewayError;

/// Trait for gateway byte transports
///
/// Implementations close themselves on any I/O error. Reads are bounded by
/// the configured read timeout and report short or failed reads as fewer
/// bytes rather than as errors; callers detect a lost link through
/// [`Transport::is_open`].
#[async_trait]
pub trait Transport: Send {
    /// Open the connection and discard anything already buffered
    async fn open(&mut self) -> Result<()>;

    /// Close the connection; closing a closed transport is a no-op
    async fn close(&mut self);

    /// Read up to `n` bytes, waiting at most the read timeout
    ///
    /// Returns fewer bytes (possibly none) on timeout, error or EOF. A
    /// single-byte read can be cancelled without losing data.
    async fn read(&mut self, n: usize) -> Bytes;

    /// Write all of `data`
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Discard pending input
    async fn flush_input(&mut self);

    /// Check if currently open
    fn is_open(&self) -> bool;

    /// Get the transport name (for logging)
    fn name(&self) -> &str;
}

/// Connection state of the gateway link
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected; a reconnect is pending
    Closed,
    /// Connection attempt in progress
    Connecting,
    /// Connected and receiving
    Open,
    /// Connected, but silent beyond the idle threshold
    Degraded,
}

impl ConnectionState {
    /// Whether the transport is usable
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Degraded)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Create the transport selected by the configuration
pub fn from_config(config: &GatewayConfig) -> Result<Box<dyn Transport>> {
    #[cfg(feature = "serial")]
    {
        Ok(match &config.connection {
            crate::config::ConnectionConfig::Serial { port, baud_rate } => Box::new(
                SerialTransport::new(port)
                    .with_baud_rate(*baud_rate)
                    .with_timeout(config.link.read_timeout),
            ),
            crate::config::ConnectionConfig::Tcp { .. } => Box::new(TcpTransport::from_config(config)?),
        })
    }

    #[cfg(not(feature = "serial"))]
    {
        match &config.connection {
            ConnectionConfig::Serial { port, .. } => Err(GatewayError::UnsupportedConnection(
                format!("serial port {} (built without the serial feature)", port.display()),
            )),
            ConnectionConfig::Tcp { .. } => Ok(Box::new(TcpTransport::from_config(config)?)),
        }
    }
}
