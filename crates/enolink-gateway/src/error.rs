//! Error types for gateway operations
//!
//! Transport failures, protocol problems on the wire and command handling
//! errors all end up here. Frame-level errors never stop the supervisor; they
//! are logged and the frame is skipped.

use enolink_eep::EepError;
use enolink_esp3::Esp3Error;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Transport Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Opening, reading or writing the transport failed
    #[error("Transport error on {target}: {reason}")]
    Transport {
        /// Port path or socket address
        target: String,
        /// Failure reason
        reason: String,
    },

    /// TCP connect did not complete in time
    #[error("Connection to {target} timed out after {duration_ms}ms")]
    ConnectTimeout {
        /// Socket address
        target: String,
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Transport is not open
    #[error("Transport not open")]
    NotConnected,

    /// Transport kind not available in this build
    #[error("Unsupported connection: {0}")]
    UnsupportedConnection(String),

    // ===== Protocol Errors =====
    /// Malformed frame
    #[error("Frame error: {0}")]
    Frame(#[from] Esp3Error),

    /// No response frame arrived in time
    #[error("No response after {duration_ms}ms")]
    ResponseTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Gateway base id could not be determined
    #[error("Gateway base id unknown")]
    NoBaseId,

    // ===== Command Errors =====
    /// Command for a device that is not registered
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Command for a disabled device
    #[error("Device disabled: {0}")]
    DeviceDisabled(String),

    /// Command payload could not be understood
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Profile lookup or command translation failed
    #[error(transparent)]
    Eep(#[from] EepError),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Supervisor task is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Build a transport error for `target`
    pub fn transport(target: impl Into<String>, reason: impl ToString) -> Self {
        GatewayError::Transport {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport { .. }
                | GatewayError::ConnectTimeout { .. }
                | GatewayError::NotConnected
                | GatewayError::ResponseTimeout { .. }
                | GatewayError::NoBaseId
                | GatewayError::PortNotFound(_)
        )
    }

    /// Check if this is a protocol error (bad data from the gateway)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            GatewayError::Frame(_) | GatewayError::ResponseTimeout { .. }
        )
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::PortNotFound(_) => "PORT_NOT_FOUND",
            GatewayError::Transport { .. } => "TRANSPORT",
            GatewayError::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            GatewayError::NotConnected => "NOT_CONNECTED",
            GatewayError::UnsupportedConnection(_) => "UNSUPPORTED_CONNECTION",
            GatewayError::Frame(e) => e.error_code(),
            GatewayError::ResponseTimeout { .. } => "RESPONSE_TIMEOUT",
            GatewayError::NoBaseId => "NO_BASE_ID",
            GatewayError::UnknownDevice(_) => "UNKNOWN_DEVICE",
            GatewayError::DeviceDisabled(_) => "DEVICE_DISABLED",
            GatewayError::InvalidCommand(_) => "INVALID_COMMAND",
            GatewayError::Eep(e) => e.error_code(),
            GatewayError::InvalidConfig(_) => "INVALID_CONFIG",
            GatewayError::ChannelClosed => "CHANNEL_CLOSED",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::transport("tcp://10.0.0.5:2000", "connection reset");
        assert_eq!(
            err.to_string(),
            "Transport error on tcp://10.0.0.5:2000: connection reset"
        );

        let err = GatewayError::ResponseTimeout { duration_ms: 2000 };
        assert_eq!(err.to_string(), "No response after 2000ms");
    }

    #[test]
    fn test_is_retriable() {
        assert!(GatewayError::NotConnected.is_retriable());
        assert!(GatewayError::transport("x", "y").is_retriable());
        assert!(!GatewayError::UnknownDevice("0581a2b3".to_string()).is_retriable());
        assert!(!GatewayError::InvalidConfig("bad".to_string()).is_retriable());
    }

    #[test]
    fn test_is_protocol_error() {
        let err = GatewayError::from(Esp3Error::Format { got: 0x00 });
        assert!(err.is_protocol_error());
        assert!(!GatewayError::NotConnected.is_protocol_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::NotConnected.error_code(), "NOT_CONNECTED");
        assert_eq!(GatewayError::ChannelClosed.error_code(), "CHANNEL_CLOSED");
        let err = GatewayError::from(EepError::UnknownProfile("A5-99-99".to_string()));
        assert_eq!(err.error_code(), "UNKNOWN_PROFILE");
    }
}
