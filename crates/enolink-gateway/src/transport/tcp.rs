//! TCP transport for network gateways
//!
//! Connects to gateways that expose the ESP3 byte stream on a TCP port,
//! such as ser2net bridges or LAN gateways. Dead peers are detected by the
//! kernel through TCP keepalive in addition to the supervisor's pings.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, trace, warn};

use super::Transport;
use crate::config::{ConnectionConfig, GatewayConfig, KeepaliveConfig, TCP_SCHEME};
use crate::error::{GatewayError, Result};

/// Bytes discarded per read while draining stale input
const DRAIN_CHUNK: usize = 1024;

/// TCP transport for gateways reachable over the network
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    keepalive: KeepaliveConfig,
    stream: Option<TcpStream>,
    name: String,
}

impl TcpTransport {
    /// Create a transport for `host:port` with default timings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let name = format!("{}{}:{}", TCP_SCHEME, host, port);
        let defaults = GatewayConfig::default();
        Self {
            host,
            port,
            connect_timeout: defaults.link.connect_timeout,
            read_timeout: defaults.link.read_timeout,
            keepalive: defaults.keepalive,
            stream: None,
            name,
        }
    }

    /// Create a transport from a TCP gateway configuration
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let ConnectionConfig::Tcp { host, port } = &config.connection else {
            return Err(GatewayError::InvalidConfig(
                "TCP transport needs a tcp:// connection".to_string(),
            ));
        };
        Ok(Self::new(host.clone(), *port)
            .with_connect_timeout(config.link.connect_timeout)
            .with_read_timeout(config.link.read_timeout)
            .with_keepalive(config.keepalive.clone()))
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set TCP keepalive parameters
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    fn configure_socket(&self, stream: &TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }

        let params = TcpKeepalive::new()
            .with_time(self.keepalive.tcp_idle)
            .with_interval(self.keepalive.tcp_interval);
        #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
        let params = params.with_retries(self.keepalive.tcp_retries);

        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&params) {
            warn!(error = %e, "Failed to enable TCP keepalive");
        }
    }

    async fn drain(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut buf = [0u8; DRAIN_CHUNK];
        let mut drained = 0usize;
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => break,
                Ok(n) => drained += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "Drain failed");
                    break;
                }
            }
        }
        if drained > 0 {
            debug!(bytes = drained, "Discarded buffered input");
        }
    }

    fn fail(&mut self, reason: &dyn std::fmt::Display) {
        error!(transport = %self.name, error = %reason, "TCP I/O error, closing");
        self.stream = None;
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let address = format!("{}:{}", self.host, self.port);
        info!(address = %address, "Connecting to TCP gateway");

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(GatewayError::transport(&self.name, e)),
            Err(_) => {
                return Err(GatewayError::ConnectTimeout {
                    target: self.name.clone(),
                    duration_ms: self.connect_timeout.as_millis() as u64,
                })
            }
        };

        self.configure_socket(&stream);
        self.stream = Some(stream);
        self.drain().await;

        info!(address = %address, "Connected to TCP gateway");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "TCP shutdown failed");
            }
            info!(transport = %self.name, "Closed TCP connection");
        }
    }

    async fn read(&mut self, n: usize) -> Bytes {
        let deadline = Instant::now() + self.read_timeout;
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
                    warn!(transport = %self.name, "Gateway closed the connection");
                    self.stream = None;
                    break;
                }
                Ok(Ok(read)) => filled += read,
                Ok(Err(e)) => {
                    self.fail(&e);
                    break;
                }
                Err(_) => break,
            }
        }

        buf.truncate(filled);
        if filled > 0 {
            trace!(bytes = filled, "Read from TCP gateway");
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
                trace!(bytes = data.len(), "Wrote to TCP gateway");
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(GatewayError::transport(&self.name, e))
            }
        }
    }

    async fn flush_input(&mut self) {
        self.drain().await;
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("name", &self.name)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn transport(port: u16) -> TcpTransport {
        TcpTransport::new("127.0.0.1", port).with_read_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_name() {
        assert_eq!(TcpTransport::new("gw.local", 2000).name(), "tcp://gw.local:2000");
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&[0x55, 0x00, 0x01]).await.unwrap();
            buf
        });

        let mut transport = transport(port);
        transport.open().await.unwrap();
        assert!(transport.is_open());

        transport.write(&[1, 2, 3]).await.unwrap();
        assert_eq!(server.await.unwrap(), [1, 2, 3]);
        assert_eq!(transport.read(3).await.as_ref(), &[0x55, 0x00, 0x01]);

        transport.close().await;
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_short_read_on_timeout() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[0xAA]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(socket);
        });

        let mut transport = transport(port);
        transport.open().await.unwrap();
        let data = transport.read(4).await;
        assert!(data.len() <= 1);
        assert!(transport.is_open());
        server.abort();
    }

    #[tokio::test]
    async fn test_eof_closes_transport() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = transport(port);
        transport.open().await.unwrap();
        server.await.unwrap();

        let data = transport.read(1).await;
        assert!(data.is_empty());
        assert!(!transport.is_open());
        assert!(matches!(transport.write(&[1]).await, Err(GatewayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, port) = listener().await;
        drop(listener);

        let mut transport = transport(port);
        let err = transport.open().await.unwrap_err();
        assert!(err.is_retriable());
        assert!(!transport.is_open());
    }
}
