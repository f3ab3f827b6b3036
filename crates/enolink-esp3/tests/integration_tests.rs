//! Integration tests for the ESP3 codec
//!
//! These tests exercise the public API the way the connection layer uses it:
//! - Splitting a noisy byte stream into frames
//! - Teach-in detection and the matching response telegram
//! - Decoding gateway responses

use bytes::BytesMut;
use enolink_esp3::{
    parse_base_id, rorg, teach_in_function, teach_in_response_data, ChecksumScope, DeviceId,
    Esp3Error, Esp3Packet, PacketType, MANUFACTURER_UNSPECIFIED, SYNC_BYTE,
};

const BASE: DeviceId = DeviceId([0xFF, 0x80, 0x00, 0x00]);
const SENSOR: DeviceId = DeviceId([0x01, 0x8A, 0x3C, 0x07]);

// ============================================================================
// Stream Handling
// ============================================================================

/// Pull every valid frame out of a buffer, skipping garbage and bad frames
fn split_frames(stream: &[u8]) -> Vec<Esp3Packet> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < stream.len() {
        if stream[pos] != SYNC_BYTE {
            pos += 1;
            continue;
        }
        match Esp3Packet::parse(&stream[pos..]) {
            Ok(packet) => {
                pos += packet.encoded_len();
                frames.push(packet);
            }
            Err(Esp3Error::Truncated { .. }) => break,
            Err(_) => pos += 1,
        }
    }
    frames
}

#[test]
fn test_frames_from_noisy_stream() {
    let temperature = Esp3Packet::radio_telegram(
        SENSOR,
        DeviceId::BROADCAST,
        rorg::FOUR_BS,
        &[0x00, 0x00, 0x80, 0x08],
        0x00,
    );
    let mut corrupt = BytesMut::from(&Esp3Packet::read_version().build()[..]);
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF;

    let mut stream = vec![0x00, 0x13, SYNC_BYTE];
    stream.extend_from_slice(&temperature.build());
    stream.extend_from_slice(&corrupt);
    stream.extend_from_slice(&Esp3Packet::read_id_base().build());
    // Start of a frame that has not fully arrived yet
    stream.extend_from_slice(&temperature.build()[..5]);

    let frames = split_frames(&stream);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].sender_id(), Some(SENSOR));
    assert_eq!(frames[0].data_bytes(), &[0x00, 0x00, 0x80, 0x08]);
    assert_eq!(frames[1].packet_type, PacketType::CommonCommand);
}

#[test]
fn test_checksum_scopes() {
    let mut raw = BytesMut::from(&Esp3Packet::read_id_base().build()[..]);
    raw[2] ^= 0x01;
    assert!(matches!(
        Esp3Packet::parse(&raw),
        Err(Esp3Error::Checksum { scope: ChecksumScope::Header, .. })
    ));

    let mut raw = BytesMut::from(&Esp3Packet::read_id_base().build()[..]);
    raw[6] ^= 0x01;
    let err = Esp3Packet::parse(&raw).unwrap_err();
    assert!(matches!(err, Esp3Error::Checksum { scope: ChecksumScope::Payload, .. }));
    assert_eq!(err.error_code(), "PAYLOAD_CHECKSUM");
}

// ============================================================================
// Teach-in
// ============================================================================

#[test]
fn test_four_bs_teach_in_and_response() {
    // A5-02-05 temperature sensor announcing itself, LRN bit clear
    let announce = Esp3Packet::radio_telegram(
        SENSOR,
        DeviceId::BROADCAST,
        rorg::FOUR_BS,
        &[0x08, 0x28, 0x46, 0x80],
        0x00,
    );
    assert!(announce.is_teach_in());
    assert_eq!(teach_in_function(announce.data_bytes()), Some((0x02, 0x05)));

    let response = Esp3Packet::teach_in_response(BASE, SENSOR, 0x02, 0x05, MANUFACTURER_UNSPECIFIED);
    assert_eq!(response.rorg(), Some(rorg::FOUR_BS));
    assert_eq!(response.sender_id(), Some(BASE));
    assert_eq!(
        response.data_bytes(),
        &teach_in_response_data(0x02, 0x05, MANUFACTURER_UNSPECIFIED)
    );
    assert_eq!(teach_in_function(response.data_bytes()), Some((0x02, 0x05)));
}

#[test]
fn test_rocker_is_never_teach_in() {
    let press = Esp3Packet::rps_press(BASE, SENSOR, 0x30);
    let release = Esp3Packet::rps_release(BASE, SENSOR);
    assert!(!press.is_teach_in());
    assert!(!release.is_teach_in());
    assert_eq!(release.data_bytes(), &[0x00]);
}

// ============================================================================
// Gateway Responses
// ============================================================================

#[test]
fn test_base_id_response() {
    let ok = Esp3Packet::new(PacketType::Response, vec![0x00, 0xFF, 0x80, 0x00, 0x00], vec![0x0A]);
    let parsed = Esp3Packet::parse(&ok.build()).unwrap();
    assert!(parsed.is_response());
    assert_eq!(parse_base_id(&parsed), Some(BASE));

    // Error return code
    let failed = Esp3Packet::new(PacketType::Response, vec![0x02, 0xFF, 0x80, 0x00, 0x00], vec![]);
    assert_eq!(parse_base_id(&failed), None);
}
