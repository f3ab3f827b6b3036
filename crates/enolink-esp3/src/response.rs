//! Decoding of gateway responses to common commands

use serde::{Deserialize, Serialize};

use crate::packet::{DeviceId, Esp3Packet};

/// Return code signalling success
pub const RET_OK: u8 = 0x00;

/// Minimum response length for CO_RD_VERSION
const VERSION_RESPONSE_LEN: usize = 33;

/// Response length for CO_RD_IDBASE: return code and four id bytes
const BASE_ID_RESPONSE_LEN: usize = 5;

/// Extract the base id from a CO_RD_IDBASE response
///
/// The exact length check keeps a late version response from being read
/// as a base id.
pub fn parse_base_id(packet: &Esp3Packet) -> Option<DeviceId> {
    if !packet.is_response()
        || packet.data.len() != BASE_ID_RESPONSE_LEN
        || packet.data.first() != Some(&RET_OK)
    {
        return None;
    }
    let bytes: [u8; 4] = packet.data.get(1..5)?.try_into().ok()?;
    Some(DeviceId(bytes))
}

/// Gateway firmware information from CO_RD_VERSION
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Application version, dotted
    pub app_version: String,
    /// API version, dotted
    pub api_version: String,
    /// Chip id as 8 hex digits
    pub chip_id: String,
    /// Application description
    pub description: String,
}

impl VersionInfo {
    /// Decode a CO_RD_VERSION response
    pub fn from_response(packet: &Esp3Packet) -> Option<Self> {
        let data = &packet.data;
        if !packet.is_response() || data.len() < VERSION_RESPONSE_LEN || data[0] != RET_OK {
            return None;
        }

        let dotted = |bytes: &[u8]| {
            bytes
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(".")
        };

        let description = data[17..33]
            .iter()
            .filter(|b| b.is_ascii() && **b != 0)
            .map(|&b| b as char)
            .collect::<String>()
            .trim()
            .to_string();

        Some(Self {
            app_version: dotted(&data[1..5]),
            api_version: dotted(&data[5..9]),
            chip_id: data[9..13].iter().map(|b| format!("{:02x}", b)).collect(),
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use bytes::Bytes;

    fn version_response() -> Esp3Packet {
        let mut data = vec![RET_OK, 2, 11, 1, 0, 2, 6, 3, 0, 0x01, 0x82, 0x4A, 0x10, 0, 0, 0, 0];
        let mut description = b"GATEWAYCTRL".to_vec();
        description.resize(16, 0);
        data.extend_from_slice(&description);
        Esp3Packet::new(PacketType::Response, data, Bytes::new())
    }

    #[test]
    fn test_parse_base_id() {
        let packet = Esp3Packet::new(
            PacketType::Response,
            vec![RET_OK, 0xFF, 0x80, 0x00, 0x00],
            vec![0x0A],
        );
        assert_eq!(parse_base_id(&packet), Some(DeviceId([0xFF, 0x80, 0x00, 0x00])));
    }

    #[test]
    fn test_version_response_is_not_a_base_id() {
        assert_eq!(parse_base_id(&version_response()), None);
    }

    #[test]
    fn test_parse_base_id_error_code() {
        let packet = Esp3Packet::new(
            PacketType::Response,
            vec![0x02, 0xFF, 0x80, 0x00, 0x00],
            Bytes::new(),
        );
        assert_eq!(parse_base_id(&packet), None);
    }

    #[test]
    fn test_version_info() {
        let info = VersionInfo::from_response(&version_response()).unwrap();
        assert_eq!(info.app_version, "2.11.1.0");
        assert_eq!(info.api_version, "2.6.3.0");
        assert_eq!(info.chip_id, "01824a10");
        assert_eq!(info.description, "GATEWAYCTRL");
    }

    #[test]
    fn test_version_info_too_short() {
        let packet = Esp3Packet::new(PacketType::Response, vec![RET_OK, 1, 2], Bytes::new());
        assert!(VersionInfo::from_response(&packet).is_none());
    }
}
