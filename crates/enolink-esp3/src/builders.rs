//! Factory builders for outbound packets

use bytes::{BufMut, Bytes, BytesMut};

use crate::family::rorg;
use crate::packet::{DeviceId, Esp3Packet, PacketType};

/// Common command: read the module version
pub const CO_RD_VERSION: u8 = 0x03;

/// Common command: read the gateway base id
pub const CO_RD_IDBASE: u8 = 0x08;

/// Sub-telegram count used for outgoing radio telegrams
const SEND_SUBTEL_NUM: u8 = 0x03;

/// dBm field value for outgoing telegrams ("send at max power")
const SEND_DBM: u8 = 0xFF;

/// RPS status with T21 and NU set (button pressed)
pub const RPS_STATUS_PRESSED: u8 = 0x30;

/// RPS status with T21 set and NU cleared (buttons released)
pub const RPS_STATUS_RELEASED: u8 = 0x20;

/// DB0 of a 4BS teach-in response: EEP response, accepted, LRN bit set
pub const TEACH_IN_ACCEPTED: u8 = 0x88;

/// Manufacturer id meaning "not specified"
pub const MANUFACTURER_UNSPECIFIED: u16 = 0x7FF;

impl Esp3Packet {
    /// Common command packet with a command code and optional arguments
    pub fn common_command(code: u8, args: &[u8]) -> Self {
        let mut data = BytesMut::with_capacity(1 + args.len());
        data.put_u8(code);
        data.put_slice(args);
        Self::new(PacketType::CommonCommand, data.freeze(), Bytes::new())
    }

    /// CO_RD_IDBASE request
    pub fn read_id_base() -> Self {
        Self::common_command(CO_RD_IDBASE, &[])
    }

    /// CO_RD_VERSION request (also used as keepalive ping)
    pub fn read_version() -> Self {
        Self::common_command(CO_RD_VERSION, &[])
    }

    /// ERP1 radio telegram addressed to `destination`
    pub fn radio_telegram(
        sender: DeviceId,
        destination: DeviceId,
        rorg: u8,
        payload: &[u8],
        status: u8,
    ) -> Self {
        let mut data = BytesMut::with_capacity(payload.len() + 6);
        data.put_u8(rorg);
        data.put_slice(payload);
        data.put_slice(sender.as_bytes());
        data.put_u8(status);

        let mut optional = BytesMut::with_capacity(7);
        optional.put_u8(SEND_SUBTEL_NUM);
        optional.put_slice(destination.as_bytes());
        optional.put_u8(SEND_DBM);
        optional.put_u8(0x00); // security level

        Self::new(PacketType::RadioErp1, data.freeze(), optional.freeze())
    }

    /// RPS telegram emulating a rocker button press
    pub fn rps_press(sender: DeviceId, destination: DeviceId, button: u8) -> Self {
        Self::radio_telegram(sender, destination, rorg::RPS, &[button], RPS_STATUS_PRESSED)
    }

    /// RPS telegram emulating the release of all buttons
    pub fn rps_release(sender: DeviceId, destination: DeviceId) -> Self {
        Self::radio_telegram(sender, destination, rorg::RPS, &[0x00], RPS_STATUS_RELEASED)
    }

    /// 4BS teach-in response confirming `func`/`type_` to a device
    pub fn teach_in_response(
        sender: DeviceId,
        destination: DeviceId,
        func: u8,
        type_: u8,
        manufacturer: u16,
    ) -> Self {
        Self::radio_telegram(
            sender,
            destination,
            rorg::FOUR_BS,
            &teach_in_response_data(func, type_, manufacturer),
            0x00,
        )
    }
}

/// Pack FUNC (6 bits), TYPE (7 bits) and manufacturer (11 bits) into DB3..DB0
pub fn teach_in_response_data(func: u8, type_: u8, manufacturer: u16) -> [u8; 4] {
    let db3 = ((func & 0x3F) << 2) | ((type_ >> 5) & 0x03);
    let db2 = ((type_ & 0x1F) << 3) | ((manufacturer >> 8) as u8 & 0x07);
    let db1 = (manufacturer & 0xFF) as u8;
    [db3, db2, db1, TEACH_IN_ACCEPTED]
}

/// FUNC and TYPE announced by a 4BS teach-in telegram's DB3/DB2
pub fn teach_in_function(data: &[u8]) -> Option<(u8, u8)> {
    let (&db3, &db2) = (data.first()?, data.get(1)?);
    let func = (db3 >> 2) & 0x3F;
    let type_ = ((db3 & 0x03) << 5) | ((db2 >> 3) & 0x1F);
    Some((func, type_))
}
