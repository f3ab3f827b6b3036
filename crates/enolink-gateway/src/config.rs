//! Configuration types for the gateway connection
//!
//! Every timing constant of the link, keepalive, reconnect and command
//! tracking behaviour lives here with its default. Durations are written in
//! humantime form (`"30s"`, `"500ms"`) when serialized.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Default baud rate of EnOcean USB sticks
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Default serial port
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// URL scheme selecting the TCP transport
pub const TCP_SCHEME: &str = "tcp://";

/// Main configuration for a gateway connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Where the gateway is attached
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Frame I/O timing
    #[serde(default)]
    pub link: LinkConfig,

    /// Idle detection and TCP keepalive
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    /// Reconnection behaviour
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Outbound command handling
    #[serde(default)]
    pub commands: CommandConfig,
}

/// How to reach the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// USB stick or serial line
    Serial {
        /// Path to serial port (e.g., /dev/ttyUSB0, COM3)
        port: PathBuf,
        /// Baud rate (default: 57600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// Network gateway or ser2net bridge
    Tcp {
        /// Host name or address
        host: String,
        /// Port number
        port: u16,
    },
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::Serial {
            port: PathBuf::from(DEFAULT_SERIAL_PORT),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl ConnectionConfig {
    /// Human readable target for logs
    pub fn target(&self) -> String {
        match self {
            ConnectionConfig::Serial { port, .. } => port.display().to_string(),
            ConnectionConfig::Tcp { host, port } => format!("{}{}:{}", TCP_SCHEME, host, port),
        }
    }
}

impl FromStr for ConnectionConfig {
    type Err = GatewayError;

    /// Parse `tcp://host:port` or a serial port path
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GatewayError::InvalidConfig("empty connection string".to_string()));
        }

        let Some(address) = s.strip_prefix(TCP_SCHEME) else {
            return Ok(ConnectionConfig::Serial {
                port: PathBuf::from(s),
                baud_rate: DEFAULT_BAUD_RATE,
            });
        };

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| GatewayError::InvalidConfig(format!("missing port in {}", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(GatewayError::InvalidConfig(format!("missing host in {}", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| GatewayError::InvalidConfig(format!("invalid port in {}: {}", s, e)))?;

        Ok(ConnectionConfig::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

/// Frame I/O timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Upper bound for a single transport read
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,

    /// TCP connect timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// How long to wait for a RESPONSE frame
    #[serde(with = "humantime_serde", default = "default_response_timeout")]
    pub response_timeout: Duration,

    /// Retry period for base id and version queries while unknown
    #[serde(with = "humantime_serde", default = "default_info_retry")]
    pub info_retry_interval: Duration,

    /// Capacity of the received telegram channel
    #[serde(default = "default_queue_size")]
    pub telegram_queue_size: usize,
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_info_retry() -> Duration {
    Duration::from_secs(10)
}

fn default_queue_size() -> usize {
    256
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_timeout: default_read_timeout(),
            connect_timeout: default_connect_timeout(),
            response_timeout: default_response_timeout(),
            info_retry_interval: default_info_retry(),
            telegram_queue_size: default_queue_size(),
        }
    }
}

/// Idle detection and TCP keepalive settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Silence after which the link counts as degraded and pings start
    #[serde(with = "humantime_serde", default = "default_idle_threshold")]
    pub idle_threshold: Duration,

    /// Minimum spacing between pings
    #[serde(with = "humantime_serde", default = "default_ping_interval")]
    pub ping_interval: Duration,

    /// Extra silence after `idle_threshold` before the link is closed
    #[serde(with = "humantime_serde", default = "default_ping_timeout")]
    pub ping_timeout: Duration,

    /// TCP keepalive idle time
    #[serde(with = "humantime_serde", default = "default_tcp_idle")]
    pub tcp_idle: Duration,

    /// TCP keepalive probe interval
    #[serde(with = "humantime_serde", default = "default_tcp_interval")]
    pub tcp_interval: Duration,

    /// TCP keepalive probe count
    #[serde(default = "default_tcp_retries")]
    pub tcp_retries: u32,
}

fn default_idle_threshold() -> Duration {
    Duration::from_secs(30)
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_tcp_idle() -> Duration {
    Duration::from_secs(60)
}

fn default_tcp_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_tcp_retries() -> u32 {
    3
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle_threshold: default_idle_threshold(),
            ping_interval: default_ping_interval(),
            ping_timeout: default_ping_timeout(),
            tcp_idle: default_tcp_idle(),
            tcp_interval: default_tcp_interval(),
            tcp_retries: default_tcp_retries(),
        }
    }
}

impl KeepaliveConfig {
    /// Silence after which the link is force-closed
    pub fn dead_after(&self) -> Duration {
        self.idle_threshold + self.ping_timeout
    }
}

/// Reconnection behaviour: fixed delay, unlimited attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay between connection attempts
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub delay: Duration,
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: default_reconnect_delay(),
        }
    }
}

/// Outbound command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// How long a sent command waits for a confirming telegram
    #[serde(with = "humantime_serde", default = "default_confirm_timeout")]
    pub confirm_timeout: Duration,

    /// Period of the expiry sweep
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// Time between press and release of an emulated rocker button
    #[serde(with = "humantime_serde", default = "default_press_duration")]
    pub press_duration: Duration,
}

fn default_confirm_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_press_duration() -> Duration {
    Duration::from_millis(100)
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: default_confirm_timeout(),
            sweep_interval: default_sweep_interval(),
            press_duration: default_press_duration(),
        }
    }
}

impl GatewayConfig {
    /// Load a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that timings are usable
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("link.read_timeout", self.link.read_timeout),
            ("link.response_timeout", self.link.response_timeout),
            ("keepalive.ping_interval", self.keepalive.ping_interval),
            ("commands.sweep_interval", self.commands.sweep_interval),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(GatewayError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }
        if self.link.telegram_queue_size == 0 {
            return Err(GatewayError::InvalidConfig(
                "link.telegram_queue_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for GatewayConfig
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.config.connection = connection;
        self
    }

    /// Use a serial port at the default baud rate
    pub fn serial_port(mut self, port: impl Into<PathBuf>) -> Self {
        self.config.connection = ConnectionConfig::Serial {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        };
        self
    }

    /// Use a TCP gateway
    pub fn tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.connection = ConnectionConfig::Tcp {
            host: host.into(),
            port,
        };
        self
    }

    /// Set the transport read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.link.read_timeout = timeout;
        self
    }

    /// Set the response timeout
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.link.response_timeout = timeout;
        self
    }

    /// Set the identity query retry interval
    pub fn info_retry_interval(mut self, interval: Duration) -> Self {
        self.config.link.info_retry_interval = interval;
        self
    }

    /// Set idle threshold, ping interval and ping timeout together
    pub fn keepalive(mut self, idle: Duration, ping_interval: Duration, ping_timeout: Duration) -> Self {
        self.config.keepalive.idle_threshold = idle;
        self.config.keepalive.ping_interval = ping_interval;
        self.config.keepalive.ping_timeout = ping_timeout;
        self
    }

    /// Set the reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect.delay = delay;
        self
    }

    /// Set the command confirmation timeout
    pub fn confirm_timeout(mut self, timeout: Duration) -> Self {
        self.config.commands.confirm_timeout = timeout;
        self
    }

    /// Set the emulated button press duration
    pub fn press_duration(mut self, duration: Duration) -> Self {
        self.config.commands.press_duration = duration;
        self
    }

    /// Build the configuration
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

// Duration as humantime text
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
