//! Bridge between the gateway and the message bus
//!
//! Inbound, radio telegrams from known devices are decoded with the device's
//! profile, annotated with `rssi` and `last_seen`, checked against pending
//! commands and published. Teach-in telegrams from unknown devices are
//! matched against the profile library and reported; nothing is added
//! automatically.
//!
//! Outbound, entity commands are translated for the device's profile,
//! registered with the [`CommandTracker`], written through the supervisor
//! and published optimistically.

use chrono::{DateTime, Utc};
use enolink_eep::{
    decode, parse_eep, Command, CommandTranslator, FieldMap, ProfileStore, Translation,
};
use enolink_esp3::family::LRN_BIT;
use enolink_esp3::{
    rorg, teach_in_function, teach_in_response_data, DeviceId, Esp3Packet,
    MANUFACTURER_UNSPECIFIED,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::CommandConfig;
use crate::error::{GatewayError, Result};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::supervisor::SupervisorHandle;
use crate::tracker::CommandTracker;

/// Timestamp format of the injected `last_seen` field
pub const LAST_SEEN_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Status byte of telegrams the bridge sends
const OUTBOUND_STATUS: u8 = 0x00;

/// Destination for decoded state
pub trait StatePublisher: Send + Sync {
    /// Publish the decoded (or optimistic) state of a device
    fn publish_state(&self, device: &DeviceRecord, fields: &FieldMap);

    /// Publish whether a device is reachable
    fn publish_availability(&self, device: &DeviceRecord, online: bool);
}

/// Profiles matching a teach-in telegram
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TeachIn {
    /// Exactly one profile fits
    Unique(String),
    /// Several profiles fit; an operator has to choose
    Ambiguous(Vec<String>),
    /// No profile fits
    Unknown,
}

/// What happened to a received telegram
#[derive(Debug, Clone, PartialEq)]
pub enum TelegramOutcome {
    /// Decoded and published
    Published(FieldMap),
    /// Teach-in from an unknown device
    TeachIn {
        /// Announcing device
        device: DeviceId,
        /// Candidate profiles
        result: TeachIn,
    },
    /// Teach-in from a known device was acknowledged
    TeachInAnswered(DeviceId),
    /// Not published
    Dropped(&'static str),
}

/// Bridge counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeStats {
    /// Telegrams published
    pub published: u64,
    /// Telegrams dropped (unknown device, no profile, no match)
    pub dropped: u64,
    /// Teach-in telegrams seen
    pub teach_ins: u64,
    /// Commands written
    pub commands_sent: u64,
    /// Commands that failed before or during the write
    pub commands_failed: u64,
}

/// Connects the supervisor, the profile library and the message bus
pub struct Bridge {
    supervisor: SupervisorHandle,
    tracker: Arc<CommandTracker>,
    registry: Arc<dyn DeviceRegistry>,
    profiles: Arc<dyn ProfileStore>,
    publisher: Arc<dyn StatePublisher>,
    translator: CommandTranslator,
    commands: CommandConfig,
    stats: Mutex<BridgeStats>,
}

impl Bridge {
    /// Create a bridge from its collaborators
    pub fn new(
        supervisor: SupervisorHandle,
        tracker: Arc<CommandTracker>,
        registry: Arc<dyn DeviceRegistry>,
        profiles: Arc<dyn ProfileStore>,
        publisher: Arc<dyn StatePublisher>,
        commands: CommandConfig,
    ) -> Self {
        Self {
            supervisor,
            tracker,
            registry,
            profiles,
            publisher,
            translator: CommandTranslator::new(),
            commands,
            stats: Mutex::new(BridgeStats::default()),
        }
    }

    /// Counters so far
    pub fn stats(&self) -> BridgeStats {
        self.stats.lock().clone()
    }

    fn dropped(&self, reason: &'static str) -> TelegramOutcome {
        self.stats.lock().dropped += 1;
        TelegramOutcome::Dropped(reason)
    }

    /// Handle one received telegram
    pub async fn process_telegram(&self, packet: &Esp3Packet) -> TelegramOutcome {
        let (Some(sender), Some(family)) = (packet.sender_id(), packet.rorg()) else {
            debug!(packet = %packet, "Not a complete radio telegram");
            return self.dropped("not a radio telegram");
        };
        let rssi = packet.rssi();
        debug!(
            sender = %sender,
            rorg = family,
            rssi = ?rssi,
            data = ?packet.data_bytes(),
            "Telegram received"
        );

        let device = self.registry.device(sender);

        let Some(device) = device else {
            if packet.is_teach_in() {
                let result = self.classify_teach_in(packet);
                self.stats.lock().teach_ins += 1;
                return TelegramOutcome::TeachIn {
                    device: sender,
                    result,
                };
            }
            debug!(sender = %sender, "Telegram from unknown device");
            return self.dropped("unknown device");
        };

        if !device.enabled {
            debug!(device = %sender, "Ignoring disabled device");
            return self.dropped("device disabled");
        }

        if family == rorg::FOUR_BS && packet.is_teach_in() && four_bs_lrn(packet).is_some() {
            self.stats.lock().teach_ins += 1;
            return match self.answer_teach_in(&device).await {
                Ok(()) => TelegramOutcome::TeachInAnswered(sender),
                Err(e) => {
                    warn!(device = %sender, error = %e, code = e.error_code(), "Teach-in response failed");
                    self.dropped("teach-in response failed")
                }
            };
        }

        let now = Utc::now();
        self.registry.touch(sender, rssi, now);

        let Some(profile) = self.profiles.profile(&device.eep) else {
            warn!(device = %sender, eep = %device.eep, "No profile for device");
            return self.dropped("no profile");
        };

        let mut fields = decode(&packet.data, &profile);
        if fields.is_empty() {
            warn!(
                device = %sender,
                eep = %device.eep,
                data = ?packet.data_bytes(),
                "Failed to parse telegram"
            );
            return self.dropped("no matching case");
        }

        annotate(&mut fields, rssi, now);
        self.tracker.check_telegram(sender, &fields);

        info!(device = %sender, name = %device.name, fields = ?fields, "Device state");
        self.publisher.publish_state(&device, &fields);
        self.publisher.publish_availability(&device, true);
        self.stats.lock().published += 1;

        TelegramOutcome::Published(fields)
    }

    fn classify_teach_in(&self, packet: &Esp3Packet) -> TeachIn {
        let sender = packet.sender_id().unwrap_or(DeviceId::BROADCAST);
        let family = packet.rorg().unwrap_or_default();
        let function = if family == rorg::FOUR_BS {
            four_bs_lrn(packet)
        } else {
            None
        };

        let mut codes: Vec<String> = self
            .profiles
            .candidates(family, function)
            .iter()
            .map(|profile| profile.eep.clone())
            .collect();

        let result = match codes.len() {
            0 => TeachIn::Unknown,
            1 => TeachIn::Unique(codes.remove(0)),
            _ => TeachIn::Ambiguous(codes),
        };

        match &result {
            TeachIn::Unique(eep) => {
                info!(device = %sender, rorg = family, eep = %eep, "Teach-in: matching profile found")
            }
            TeachIn::Ambiguous(candidates) => warn!(
                device = %sender,
                rorg = family,
                candidates = ?candidates,
                "Teach-in: several profiles match, manual selection required"
            ),
            TeachIn::Unknown => warn!(
                device = %sender,
                rorg = family,
                function = ?function,
                "Teach-in: no matching profile"
            ),
        }
        result
    }

    async fn answer_teach_in(&self, device: &DeviceRecord) -> Result<()> {
        let (_, func, type_) = parse_eep(&device.eep).ok_or_else(|| {
            GatewayError::InvalidConfig(format!("bad EEP code {} for {}", device.eep, device.id))
        })?;
        let data = teach_in_response_data(func, type_, MANUFACTURER_UNSPECIFIED);
        self.supervisor
            .send_telegram(device.id, rorg::FOUR_BS, &data, OUTBOUND_STATUS)
            .await?;
        info!(device = %device.id, eep = %device.eep, "Teach-in response sent");
        Ok(())
    }

    /// Send a command to a device entity
    ///
    /// The command is registered with the tracker before it is written and
    /// cancelled again if the write fails.
    pub async fn handle_command(&self, device: DeviceId, entity: &str, command: Command) -> Result<()> {
        let result = self.send_command(device, entity, command).await;
        let mut stats = self.stats.lock();
        match &result {
            Ok(()) => stats.commands_sent += 1,
            Err(_) => stats.commands_failed += 1,
        }
        result
    }

    async fn send_command(&self, id: DeviceId, entity: &str, command: Command) -> Result<()> {
        let device = self
            .registry
            .device(id)
            .ok_or_else(|| GatewayError::UnknownDevice(id.to_string()))?;
        if !device.enabled {
            return Err(GatewayError::DeviceDisabled(id.to_string()));
        }

        let translation = self
            .translator
            .try_translate(&device.eep, entity, &command)
            .inspect_err(|e| warn!(device = %id, entity, error = %e, "Cannot translate command"))?;

        let tracked = command.expected_state(entity).map(|expected| {
            self.tracker.add_pending(
                id,
                entity,
                command.clone(),
                expected,
                self.commands.confirm_timeout,
            )
        });

        let written = match &translation {
            Translation::Telegram { rorg, data } => {
                self.supervisor
                    .send_telegram(id, *rorg, data, OUTBOUND_STATUS)
                    .await
            }
            Translation::Momentary { button } => {
                self.supervisor
                    .send_momentary(id, *button, self.commands.press_duration)
                    .await
            }
        };

        if let Err(e) = written {
            // A newer command may have replaced this entry while the write was in flight
            if let Some(pending) = tracked {
                self.tracker.cancel_id(id, entity, pending);
            }
            warn!(device = %id, entity, command = command.kind(), error = %e, "Command not sent");
            return Err(e);
        }

        info!(device = %id, entity, command = command.kind(), "Command sent");
        let optimistic = command.optimistic_state(entity);
        if !optimistic.is_empty() {
            self.publisher.publish_state(&device, &optimistic);
        }
        Ok(())
    }

    /// Parse a JSON command payload and send it
    pub async fn handle_command_payload(
        &self,
        device: DeviceId,
        entity: &str,
        payload: &Value,
    ) -> Result<()> {
        let command = Command::from_payload(payload)
            .ok_or_else(|| GatewayError::InvalidCommand(payload.to_string()))?;
        self.handle_command(device, entity, command).await
    }

    /// Process telegrams until the channel closes
    pub async fn run(&self, mut telegrams: mpsc::Receiver<Esp3Packet>) {
        info!("Bridge started");
        while let Some(packet) = telegrams.recv().await {
            self.process_telegram(&packet).await;
        }
        info!("Bridge stopped");
    }

    /// Stop the tracker, then the supervisor
    pub async fn shutdown(&self) -> Result<()> {
        self.tracker.stop();
        match self.supervisor.shutdown().await {
            Ok(()) | Err(GatewayError::ChannelClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("tracker", &self.tracker)
            .field("stats", &self.stats())
            .finish()
    }
}

/// FUNC/TYPE of a 4BS telegram whose DB0 LRN bit is clear
fn four_bs_lrn(packet: &Esp3Packet) -> Option<(u8, u8)> {
    let data = packet.data_bytes();
    let db0 = *data.get(3)?;
    if db0 & LRN_BIT != 0 {
        return None;
    }
    teach_in_function(data)
}

fn annotate(fields: &mut FieldMap, rssi: Option<i16>, now: DateTime<Utc>) {
    if let Some(rssi) = rssi {
        fields.insert("rssi".to_string(), Value::from(rssi));
    }
    fields.insert(
        "last_seen".to_string(),
        Value::from(now.format(LAST_SEEN_FORMAT).to_string()),
    );
}
