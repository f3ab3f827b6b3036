//! Error types for ESP3 packet handling
//!
//! Every variant describes why a byte sequence could not be turned into a
//! usable packet. None of them are fatal to a reader: the connection layer
//! drops the offending bytes and keeps going.

use thiserror::Error;

/// Which checksum of a frame failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumScope {
    /// CRC over length, optional length and packet type
    Header,
    /// CRC over data and optional data
    Payload,
}

impl std::fmt::Display for ChecksumScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumScope::Header => write!(f, "header"),
            ChecksumScope::Payload => write!(f, "payload"),
        }
    }
}

/// Main error type for ESP3 encoding and decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Esp3Error {
    /// First byte is not the sync marker
    #[error("Invalid sync byte: expected 0x55, got 0x{got:02X}")]
    Format {
        /// The byte found in the sync position
        got: u8,
    },

    /// Header or payload CRC did not match
    #[error("{scope} checksum mismatch: expected 0x{expected:02X}, got 0x{got:02X}")]
    Checksum {
        /// Which checksum failed
        scope: ChecksumScope,
        /// Value computed over the received bytes
        expected: u8,
        /// Value carried in the frame
        got: u8,
    },

    /// Declared lengths exceed the bytes available
    #[error("Truncated packet: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required by the header
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Device id string is not 8 hex digits
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),
}

impl Esp3Error {
    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            Esp3Error::Format { .. } => "FORMAT",
            Esp3Error::Checksum {
                scope: ChecksumScope::Header,
                ..
            } => "HEADER_CHECKSUM",
            Esp3Error::Checksum {
                scope: ChecksumScope::Payload,
                ..
            } => "PAYLOAD_CHECKSUM",
            Esp3Error::Truncated { .. } => "TRUNCATED",
            Esp3Error::InvalidDeviceId(_) => "INVALID_DEVICE_ID",
        }
    }
}

/// Result type alias for ESP3 operations
pub type Result<T> = std::result::Result<T, Esp3Error>;
