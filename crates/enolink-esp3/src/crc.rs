//! CRC-8 used by ESP3 for both the header and the payload checksum

/// Generator polynomial x^8 + x^2 + x + 1
pub const CRC8_POLY: u8 = 0x07;

/// Compute the ESP3 CRC-8 (MSB first, initial value 0) over `data`
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| {
        let mut crc = crc ^ byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
        crc
    })
}
