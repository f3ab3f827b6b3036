//! ESP3 packet codec for EnOcean gateways
//!
//! EnOcean USB sticks and network gateways talk the EnOcean Serial Protocol
//! 3 (ESP3): a byte stream of frames, each with a sync byte, a small header
//! protected by a CRC-8 and a payload protected by a second CRC-8.
//!
//! This crate contains only the pure parts of the protocol:
//!
//! - [`Esp3Packet`] parsing and serialization with checksum validation
//! - telegram accessors (RORG, sender id, data bytes, status, RSSI)
//! - per-family layout strategies ([`FamilyLayout`])
//! - builders for the commands and telegrams a gateway sends
//! - decoders for the base id and version responses
//!
//! # Example
//!
//! ```rust
//! use enolink_esp3::{Esp3Packet, PacketType};
//!
//! let raw = Esp3Packet::read_version().build();
//! let packet = Esp3Packet::parse(&raw).unwrap();
//! assert_eq!(packet.packet_type, PacketType::CommonCommand);
//! ```

#![warn(missing_docs)]

pub mod builders;
pub mod crc;
pub mod error;
pub mod family;
pub mod packet;
pub mod response;

pub use builders::{
    teach_in_function, teach_in_response_data, CO_RD_IDBASE, CO_RD_VERSION,
    MANUFACTURER_UNSPECIFIED,
};
pub use crc::crc8;
pub use error::{ChecksumScope, Esp3Error, Result};
pub use family::{layout_for, rorg, FamilyLayout};
pub use packet::{DeviceId, Esp3Packet, PacketType, HEADER_LEN, MIN_PACKET_LEN, SYNC_BYTE};
pub use response::{parse_base_id, VersionInfo};
