//! EnOcean gateway supervision and bridging
//!
//! This crate keeps a connection to an EnOcean gateway (USB stick or network
//! gateway speaking ESP3) alive and connects it to a message bus.
//!
//! # Architecture
//!
//! 1. **Transport** - serial or TCP byte stream with bounded reads
//! 2. **Supervisor** - framing, reconnects, keepalive pings, identity queries
//! 3. **Tracker** - confirmation of sent commands by later telegrams
//! 4. **Bridge** - profile decoding, publication and command handling
//!
//! The supervisor runs as its own task and owns the transport. Everything
//! else talks to it through a [`SupervisorHandle`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use enolink_gateway::{transport, Bridge, CommandTracker, GatewayConfigBuilder, Supervisor};
//!
//! let config = GatewayConfigBuilder::new().tcp("192.168.1.20", 2000).build();
//! let (supervisor, handle, telegrams) = Supervisor::new(transport::from_config(&config)?, config.clone());
//! tokio::spawn(supervisor.run());
//!
//! let tracker = Arc::new(CommandTracker::new(
//!     config.commands.sweep_interval,
//!     |_, _, _, _| {},
//!     |_, _, _| {},
//! ));
//! tracker.start();
//!
//! let bridge = Bridge::new(handle, tracker, registry, profiles, publisher, config.commands);
//! bridge.run(telegrams).await;
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port transport (requires `libudev-dev` on Linux)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod registry;
pub mod supervisor;
pub mod test_utils;
pub mod tracker;
pub mod transport;

pub use bridge::{Bridge, BridgeStats, StatePublisher, TeachIn, TelegramOutcome, LAST_SEEN_FORMAT};
pub use config::{
    CommandConfig, ConnectionConfig, GatewayConfig, GatewayConfigBuilder, KeepaliveConfig,
    LinkConfig, ReconnectConfig, DEFAULT_BAUD_RATE, DEFAULT_SERIAL_PORT,
};
pub use error::{GatewayError, Result};
pub use registry::{DeviceRecord, DeviceRegistry, MemoryRegistry, Sighting};
pub use supervisor::{GatewayStatus, Supervisor, SupervisorCommand, SupervisorHandle};
pub use tracker::{CommandTracker, ConfirmCallback, PendingCommand, TimeoutCallback};
pub use transport::{ConnectionState, TcpTransport, Transport};

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_BAUD_RATE, 57600);
        assert_eq!(LAST_SEEN_FORMAT, "%Y-%m-%dT%H:%M:%SZ");
    }
}
