//! State output as JSON log lines
//!
//! The message bus sits outside this process. Every publication is logged on
//! the `enolink::bus` target as a topic plus JSON payload, which a log
//! shipper or wrapper script can forward.

use enolink_eep::FieldMap;
use enolink_gateway::{DeviceRecord, StatePublisher};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// Topic prefix of all publications
pub const TOPIC_PREFIX: &str = "enolink";

/// One message for the bus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}

impl BusMessage {
    pub fn state(device: &DeviceRecord, fields: &FieldMap) -> Self {
        let payload = serde_json::to_value(fields).unwrap_or(Value::Null);
        Self {
            topic: format!("{}/{}/state", TOPIC_PREFIX, device.id),
            payload,
            retain: false,
        }
    }

    pub fn availability(device: &DeviceRecord, online: bool) -> Self {
        let payload = Value::from(if online { "online" } else { "offline" });
        Self {
            topic: format!("{}/{}/availability", TOPIC_PREFIX, device.id),
            payload,
            retain: true,
        }
    }
}

/// Publisher writing bus messages to the log
#[derive(Debug, Default)]
pub struct LogPublisher;

impl LogPublisher {
    fn emit(&self, device: &DeviceRecord, message: BusMessage) {
        info!(
            target: "enolink::bus",
            device = %device.id,
            name = %device.name,
            topic = %message.topic,
            retain = message.retain,
            payload = %message.payload,
            "publish"
        );
    }
}

impl StatePublisher for LogPublisher {
    fn publish_state(&self, device: &DeviceRecord, fields: &FieldMap) {
        self.emit(device, BusMessage::state(device, fields));
    }

    fn publish_availability(&self, device: &DeviceRecord, online: bool) {
        self.emit(device, BusMessage::availability(device, online));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enolink_esp3::DeviceId;
    use serde_json::json;

    fn dimmer() -> DeviceRecord {
        DeviceRecord::new(DeviceId([0x05, 0x83, 0xF0, 0xA4]), "Kitchen dimmer", "A5-38-08")
    }

    #[test]
    fn test_state_message() {
        let fields = FieldMap::from([
            ("switch".to_string(), json!(1)),
            ("rssi".to_string(), json!(-70)),
        ]);
        let message = BusMessage::state(&dimmer(), &fields);
        assert_eq!(message.topic, "enolink/0583f0a4/state");
        assert_eq!(message.payload, json!({"switch": 1, "rssi": -70}));
        assert!(!message.retain);
    }

    #[test]
    fn test_availability_is_retained() {
        let message = BusMessage::availability(&dimmer(), false);
        assert_eq!(message.topic, "enolink/0583f0a4/availability");
        assert_eq!(message.payload, json!("offline"));
        assert!(message.retain);
    }
}
