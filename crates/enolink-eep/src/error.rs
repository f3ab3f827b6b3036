//! Error types for profile loading and command translation

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for EEP operations
#[derive(Error, Debug)]
pub enum EepError {
    // ===== Loading Errors =====
    /// Profile file could not be read
    #[error("Failed to read profile {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Profile file is not valid profile JSON
    #[error("Failed to parse profile {path}: {source}")]
    Json {
        /// File that failed
        path: PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// Glob pattern for the profile directory is invalid
    #[error("Invalid profile directory pattern: {0}")]
    InvalidPattern(String),

    /// Library has no directory to reload from
    #[error("Profile library was not loaded from a directory")]
    NoSource,

    // ===== Translation Errors =====
    /// No profile with this EEP code
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// Profile has no mapping for this command
    #[error("Command {command} not supported for EEP {eep}")]
    UnsupportedCommand {
        /// EEP code of the target device
        eep: String,
        /// Command kind that has no mapping
        command: &'static str,
    },
}

impl EepError {
    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            EepError::Io { .. } => "PROFILE_IO",
            EepError::Json { .. } => "PROFILE_JSON",
            EepError::InvalidPattern(_) => "INVALID_PATTERN",
            EepError::NoSource => "NO_SOURCE",
            EepError::UnknownProfile(_) => "UNKNOWN_PROFILE",
            EepError::UnsupportedCommand { .. } => "UNSUPPORTED_COMMAND",
        }
    }
}

/// Result type alias for EEP operations
pub type Result<T> = std::result::Result<T, EepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_command_message() {
        let err = EepError::UnsupportedCommand {
            eep: "A5-02-05".to_string(),
            command: "dim",
        };
        assert_eq!(err.to_string(), "Command dim not supported for EEP A5-02-05");
        assert_eq!(err.error_code(), "UNSUPPORTED_COMMAND");
    }
}
