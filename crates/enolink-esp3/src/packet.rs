//! ESP3 packet structure, parsing and serialization
//!
//! Wire layout:
//!
//! ```text
//! +------+----------+---------+------+------+---------+-----------+------+
//! | 0x55 | data len | opt len | type | CRC8 | data    | optional  | CRC8 |
//! |  1   |  2 (BE)  |    1    |  1   |  1   | n bytes | m bytes   |  1   |
//! +------+----------+---------+------+------+---------+-----------+------+
//! ```
//!
//! The header CRC covers the four bytes after the sync byte; the payload
//! CRC covers data followed by optional data.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::crc::crc8;
use crate::error::{ChecksumScope, Esp3Error, Result};
use crate::family::layout_for;

/// Sync marker that starts every ESP3 frame
pub const SYNC_BYTE: u8 = 0x55;

/// Length of the fixed header following the sync byte (without its CRC)
pub const HEADER_LEN: usize = 4;

/// Smallest byte count `parse` accepts (sync + header + header CRC)
pub const MIN_PACKET_LEN: usize = 6;

/// Radio telegram payload: RORG + sender(4) + status at least
const MIN_TELEGRAM_LEN: usize = 6;

/// ESP3 packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// ERP1 radio telegram
    RadioErp1,
    /// Response to a command
    Response,
    /// Radio sub-telegram
    RadioSubTel,
    /// Event from the module
    Event,
    /// Common command (outbound)
    CommonCommand,
    /// Smart acknowledge command
    SmartAckCommand,
    /// Remote management command
    RemoteManCommand,
    /// Radio message (chained)
    RadioMessage,
    /// ERP2 radio telegram
    RadioErp2,
    /// Any other type code
    Unknown(u8),
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::RadioErp1,
            0x02 => Self::Response,
            0x03 => Self::RadioSubTel,
            0x04 => Self::Event,
            0x05 => Self::CommonCommand,
            0x06 => Self::SmartAckCommand,
            0x07 => Self::RemoteManCommand,
            0x09 => Self::RadioMessage,
            0x0A => Self::RadioErp2,
            other => Self::Unknown(other),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(kind: PacketType) -> Self {
        match kind {
            PacketType::RadioErp1 => 0x01,
            PacketType::Response => 0x02,
            PacketType::RadioSubTel => 0x03,
            PacketType::Event => 0x04,
            PacketType::CommonCommand => 0x05,
            PacketType::SmartAckCommand => 0x06,
            PacketType::RemoteManCommand => 0x07,
            PacketType::RadioMessage => 0x09,
            PacketType::RadioErp2 => 0x0A,
            PacketType::Unknown(other) => other,
        }
    }
}

/// 32-bit EnOcean device (or gateway base) id
///
/// Rendered as 8 lowercase hex digits, the form registries key devices by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(pub [u8; 4]);

impl DeviceId {
    /// Broadcast destination
    pub const BROADCAST: DeviceId = DeviceId([0xFF; 4]);

    /// Raw id bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Id as a big-endian integer
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(value: u32) -> Self {
        DeviceId(value.to_be_bytes())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl FromStr for DeviceId {
    type Err = Esp3Error;

    fn from_str(s: &str) -> Result<Self> {
        let cleaned: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if cleaned.len() != 8 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Esp3Error::InvalidDeviceId(s.to_string()));
        }
        u32::from_str_radix(&cleaned, 16)
            .map(DeviceId::from)
            .map_err(|_| Esp3Error::InvalidDeviceId(s.to_string()))
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Esp3Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

/// One ESP3 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Esp3Packet {
    /// Packet type byte
    pub packet_type: PacketType,
    /// Data section
    pub data: Bytes,
    /// Optional data section
    pub optional: Bytes,
}

impl Esp3Packet {
    /// Create a packet from its parts
    pub fn new(packet_type: PacketType, data: impl Into<Bytes>, optional: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            data: data.into(),
            optional: optional.into(),
        }
    }

    /// Parse one complete frame starting at the sync byte
    ///
    /// Trailing bytes after the payload CRC are ignored.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < MIN_PACKET_LEN {
            return Err(Esp3Error::Truncated {
                needed: MIN_PACKET_LEN,
                available: raw.len(),
            });
        }

        if raw[0] != SYNC_BYTE {
            return Err(Esp3Error::Format { got: raw[0] });
        }

        let header_crc = crc8(&raw[1..5]);
        if header_crc != raw[5] {
            return Err(Esp3Error::Checksum {
                scope: ChecksumScope::Header,
                expected: header_crc,
                got: raw[5],
            });
        }

        let data_len = u16::from_be_bytes([raw[1], raw[2]]) as usize;
        let optional_len = raw[3] as usize;
        let data_end = MIN_PACKET_LEN + data_len;
        let optional_end = data_end + optional_len;

        if raw.len() < optional_end + 1 {
            return Err(Esp3Error::Truncated {
                needed: optional_end + 1,
                available: raw.len(),
            });
        }

        let payload_crc = crc8(&raw[MIN_PACKET_LEN..optional_end]);
        if payload_crc != raw[optional_end] {
            return Err(Esp3Error::Checksum {
                scope: ChecksumScope::Payload,
                expected: payload_crc,
                got: raw[optional_end],
            });
        }

        Ok(Self {
            packet_type: PacketType::from(raw[4]),
            data: Bytes::copy_from_slice(&raw[MIN_PACKET_LEN..data_end]),
            optional: Bytes::copy_from_slice(&raw[data_end..optional_end]),
        })
    }

    /// Total frame length on the wire
    pub fn encoded_len(&self) -> usize {
        MIN_PACKET_LEN + self.data.len() + self.optional.len() + 1
    }

    /// Serialize into `dst`, computing both checksums
    ///
    /// Lengths are taken from the sections as they are; a data section
    /// longer than 65535 bytes or optional data longer than 255 bytes is
    /// the caller's problem.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());

        let header = [
            (self.data.len() >> 8) as u8,
            self.data.len() as u8,
            self.optional.len() as u8,
            u8::from(self.packet_type),
        ];

        dst.put_u8(SYNC_BYTE);
        dst.put_slice(&header);
        dst.put_u8(crc8(&header));

        let payload_start = dst.len();
        dst.put_slice(&self.data);
        dst.put_slice(&self.optional);
        let payload_crc = crc8(&dst[payload_start..]);
        dst.put_u8(payload_crc);
    }

    /// Serialize into a fresh buffer
    pub fn build(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Whether this is an ERP1 radio telegram
    pub fn is_radio(&self) -> bool {
        self.packet_type == PacketType::RadioErp1
    }

    /// Whether this is a response frame
    pub fn is_response(&self) -> bool {
        self.packet_type == PacketType::Response
    }

    fn telegram(&self) -> Option<&[u8]> {
        (self.is_radio() && self.data.len() >= MIN_TELEGRAM_LEN).then_some(&self.data[..])
    }

    /// RORG (family code) of a radio telegram
    pub fn rorg(&self) -> Option<u8> {
        if self.is_radio() {
            self.data.first().copied()
        } else {
            None
        }
    }

    /// Sender id: the four bytes preceding the status byte
    pub fn sender_id(&self) -> Option<DeviceId> {
        let telegram = self.telegram()?;
        let end = telegram.len() - 1;
        let bytes: [u8; 4] = telegram[end - 4..end].try_into().ok()?;
        Some(DeviceId(bytes))
    }

    /// Data bytes between RORG and sender id
    pub fn data_bytes(&self) -> &[u8] {
        match self.telegram() {
            Some(telegram) => &telegram[1..telegram.len() - 5],
            None => &[],
        }
    }

    /// Status byte (last data byte) of a radio telegram
    pub fn status(&self) -> Option<u8> {
        if self.is_radio() {
            self.data.last().copied()
        } else {
            None
        }
    }

    /// Received signal strength in dBm (optional data byte 5, negated)
    pub fn rssi(&self) -> Option<i16> {
        self.optional.get(5).map(|&raw| -i16::from(raw))
    }

    /// Whether this telegram announces a device rather than carrying data
    pub fn is_teach_in(&self) -> bool {
        match (self.rorg(), self.status()) {
            (Some(rorg), Some(status)) => layout_for(rorg).is_teach_in(status),
            _ => false,
        }
    }
}

impl std::fmt::Display for Esp3Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Esp3Packet(type=0x{:02X}, data_len={}, opt_len={}",
            u8::from(self.packet_type),
            self.data.len(),
            self.optional.len()
        )?;
        if let Some(sender) = self.sender_id() {
            write!(f, ", sender={}", sender)?;
        }
        if let Some(rorg) = self.rorg() {
            write!(f, ", rorg=0x{:02X}", rorg)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_bs_telegram() -> Esp3Packet {
        Esp3Packet::new(
            PacketType::RadioErp1,
            vec![0xA5, 0x02, 0x00, 0x64, 0x09, 0xFF, 0x80, 0x00, 0x01, 0x08],
            vec![0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0x4A, 0x00],
        )
    }

    #[test]
    fn test_build_read_version_frame() {
        let packet = Esp3Packet::new(PacketType::CommonCommand, vec![0x03], Bytes::new());
        assert_eq!(
            packet.build().as_ref(),
            &[0x55, 0x00, 0x01, 0x00, 0x05, 0x70, 0x03, 0x09]
        );
    }

    #[test]
    fn test_parse_roundtrip() {
        let packet = four_bs_telegram();
        let raw = packet.build();
        let parsed = Esp3Packet::parse(&raw).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.build(), raw);
    }

    #[test]
    fn test_parse_rejects_short_input() {
        let err = Esp3Packet::parse(&[0x55, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, Esp3Error::Truncated { needed: 6, available: 3 }));
    }

    #[test]
    fn test_parse_rejects_bad_sync() {
        let mut raw = four_bs_telegram().build().to_vec();
        raw[0] = 0x54;
        assert_eq!(
            Esp3Packet::parse(&raw).unwrap_err(),
            Esp3Error::Format { got: 0x54 }
        );
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        let raw = four_bs_telegram().build();
        let err = Esp3Packet::parse(&raw[..raw.len() - 3]).unwrap_err();
        assert!(matches!(err, Esp3Error::Truncated { .. }));
    }

    #[test]
    fn test_single_bit_flips_are_detected() {
        let raw = four_bs_telegram().build().to_vec();

        for index in 1..raw.len() {
            for bit in 0..8 {
                let mut corrupted = raw.clone();
                corrupted[index] ^= 1 << bit;
                let result = Esp3Packet::parse(&corrupted);

                match index {
                    // Header bytes and the header CRC
                    1..=5 => match result {
                        Err(Esp3Error::Checksum {
                            scope: ChecksumScope::Header,
                            ..
                        }) => {}
                        other => panic!("byte {index} bit {bit}: {other:?}"),
                    },
                    _ => match result {
                        Err(Esp3Error::Checksum {
                            scope: ChecksumScope::Payload,
                            ..
                        }) => {}
                        other => panic!("byte {index} bit {bit}: {other:?}"),
                    },
                }
            }
        }
    }

    #[test]
    fn test_telegram_accessors() {
        let packet = four_bs_telegram();
        assert_eq!(packet.rorg(), Some(0xA5));
        assert_eq!(packet.sender_id(), Some(DeviceId([0xFF, 0x80, 0x00, 0x01])));
        assert_eq!(packet.data_bytes(), &[0x02, 0x00, 0x64, 0x09]);
        assert_eq!(packet.status(), Some(0x08));
        assert_eq!(packet.rssi(), Some(-74));
        assert!(!packet.is_teach_in());
    }

    #[test]
    fn test_rps_accessors() {
        let packet = Esp3Packet::new(
            PacketType::RadioErp1,
            vec![0xF6, 0x30, 0xFE, 0xF8, 0x12, 0x34, 0x30],
            Bytes::new(),
        );
        assert_eq!(packet.sender_id().unwrap().to_string(), "fef81234");
        assert_eq!(packet.data_bytes(), &[0x30]);
        assert_eq!(packet.rssi(), None);
        assert!(!packet.is_teach_in());
    }

    #[test]
    fn test_accessors_on_non_radio_packet() {
        let packet = Esp3Packet::new(PacketType::Response, vec![0x00, 1, 2, 3, 4, 5], Bytes::new());
        assert_eq!(packet.rorg(), None);
        assert_eq!(packet.sender_id(), None);
        assert!(packet.data_bytes().is_empty());
        assert!(!packet.is_teach_in());
    }

    #[test]
    fn test_device_id_parsing() {
        let id: DeviceId = "05834fa4".parse().unwrap();
        assert_eq!(id.as_u32(), 0x0583_4FA4);
        assert_eq!(id.to_string(), "05834fa4");
        assert_eq!("05:83:4F:A4".parse::<DeviceId>().unwrap(), id);
        assert!("0583".parse::<DeviceId>().is_err());
        assert!("zz834fa4".parse::<DeviceId>().is_err());
        assert!("+1234567".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_device_id_serde() {
        let id = DeviceId::from(0x0102_0304);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"01020304\"");
        let back: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_packet_type_codes() {
        assert_eq!(PacketType::from(0x01), PacketType::RadioErp1);
        assert_eq!(u8::from(PacketType::CommonCommand), 0x05);
        assert_eq!(PacketType::from(0x42), PacketType::Unknown(0x42));
        assert_eq!(u8::from(PacketType::Unknown(0x42)), 0x42);
    }
}
