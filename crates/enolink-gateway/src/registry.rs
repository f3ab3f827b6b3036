//! Known devices
//!
//! The bridge only decodes telegrams from devices it knows. A device list is
//! a JSON array of records:
//!
//! ```json
//! [
//!   { "id": "0583f0a4", "name": "Kitchen dimmer", "eep": "A5-38-08" },
//!   { "id": "fefa1b2c", "name": "Hall rocker", "eep": "F6-02-01", "enabled": false }
//! ]
//! ```

use chrono::{DateTime, Utc};
use enolink_esp3::DeviceId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{GatewayError, Result};

/// A configured device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Radio id of the device
    pub id: DeviceId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// EEP code of the device's profile, e.g. `A5-38-08`
    pub eep: String,
    /// Disabled devices are ignored in both directions
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl DeviceRecord {
    /// An enabled device
    pub fn new(id: DeviceId, name: impl Into<String>, eep: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            eep: eep.into(),
            enabled: true,
        }
    }
}

/// Last reception details of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sighting {
    /// When the device was last heard
    pub at: DateTime<Utc>,
    /// Signal strength of that telegram, in dBm
    pub rssi: Option<i16>,
}

/// Lookup of known devices
pub trait DeviceRegistry: Send + Sync {
    /// The record for `id`, if known
    fn device(&self, id: DeviceId) -> Option<DeviceRecord>;

    /// Record that a telegram from `id` was received
    fn touch(&self, id: DeviceId, rssi: Option<i16>, at: DateTime<Utc>);
}

#[derive(Debug)]
struct Entry {
    record: DeviceRecord,
    sighting: Option<Sighting>,
}

/// In-memory device registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<DeviceId, Entry>>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `records`
    pub fn from_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let registry = Self::new();
        for record in records {
            registry.insert(record);
        }
        registry
    }

    /// Parse a JSON device list
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<DeviceRecord> = serde_json::from_str(json)
            .map_err(|e| GatewayError::InvalidConfig(format!("device list: {}", e)))?;
        Ok(Self::from_records(records))
    }

    /// Load a JSON device list from a file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&json)?;
        info!(path = %path.display(), devices = registry.len(), "Loaded device list");
        Ok(registry)
    }

    /// Add or replace a device
    pub fn insert(&self, record: DeviceRecord) {
        debug!(device = %record.id, eep = %record.eep, "Registered device");
        self.devices.write().insert(
            record.id,
            Entry {
                record,
                sighting: None,
            },
        );
    }

    /// Remove a device
    pub fn remove(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.devices.write().remove(&id).map(|entry| entry.record)
    }

    /// When the device was last heard, and how strong
    pub fn last_seen(&self, id: DeviceId) -> Option<Sighting> {
        self.devices.read().get(&id).and_then(|entry| entry.sighting)
    }

    /// All records, ordered by id
    pub fn records(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<_> = self
            .devices
            .read()
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Whether no devices are known
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn device(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.devices.read().get(&id).map(|entry| entry.record.clone())
    }

    fn touch(&self, id: DeviceId, rssi: Option<i16>, at: DateTime<Utc>) {
        if let Some(entry) = self.devices.write().get_mut(&id) {
            entry.sighting = Some(Sighting { at, rssi });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = r#"[
        { "id": "0583f0a4", "name": "Kitchen dimmer", "eep": "A5-38-08" },
        { "id": "FEFA1B2C", "eep": "F6-02-01", "enabled": false }
    ]"#;

    #[test]
    fn test_from_json() {
        let registry = MemoryRegistry::from_json(LIST).unwrap();
        assert_eq!(registry.len(), 2);

        let dimmer = registry.device(DeviceId([0x05, 0x83, 0xF0, 0xA4])).unwrap();
        assert_eq!(dimmer.name, "Kitchen dimmer");
        assert!(dimmer.enabled);

        let rocker = registry.device(DeviceId([0xFE, 0xFA, 0x1B, 0x2C])).unwrap();
        assert!(!rocker.enabled);
        assert!(rocker.name.is_empty());
    }

    #[test]
    fn test_invalid_json() {
        let err = MemoryRegistry::from_json(r#"[{ "id": "xyz", "eep": "A5-38-08" }]"#).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfig(_)));
    }

    #[test]
    fn test_touch_records_sighting() {
        let id = DeviceId([0x01, 0x02, 0x03, 0x04]);
        let registry = MemoryRegistry::from_records([DeviceRecord::new(id, "Sensor", "A5-02-05")]);
        assert!(registry.last_seen(id).is_none());

        let now = Utc::now();
        registry.touch(id, Some(-72), now);
        assert_eq!(registry.last_seen(id), Some(Sighting { at: now, rssi: Some(-72) }));

        // Unknown devices are not added by a sighting
        registry.touch(DeviceId([9, 9, 9, 9]), None, now);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, LIST).unwrap();
        let registry = MemoryRegistry::load_file(&path).unwrap();
        assert_eq!(registry.records().len(), 2);

        let missing = MemoryRegistry::load_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(GatewayError::Io(_))));
    }
}
