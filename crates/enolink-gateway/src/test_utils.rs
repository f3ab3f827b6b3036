//! Test utilities: a scripted transport and recording collaborators
//!
//! [`MockTransport`] stands in for a gateway. Tests push frames for it to
//! return, inspect what was written and inject failures. Clones share state,
//! so a test keeps one clone while the supervisor owns another.
//!
//! # Example
//!
//! ```rust
//! use enolink_gateway::test_utils::{rps_telegram, MockTransport};
//! use enolink_esp3::DeviceId;
//!
//! let mock = MockTransport::new();
//! mock.push_packet(&rps_telegram(DeviceId([1, 2, 3, 4]), 0x30, 0x30));
//! assert!(mock.written().is_empty());
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use enolink_eep::FieldMap;
use enolink_esp3::{rorg, DeviceId, Esp3Packet, PacketType, CO_RD_IDBASE, CO_RD_VERSION};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::bridge::StatePublisher;
use crate::error::{GatewayError, Result};
use crate::registry::DeviceRecord;
use crate::transport::Transport;

/// Base id answered by [`MockTransport`] unless configured otherwise
pub const MOCK_BASE_ID: DeviceId = DeviceId([0xFF, 0x80, 0x00, 0x00]);

/// A frame written to the mock, with the time it was written
#[derive(Debug, Clone)]
pub struct WrittenFrame {
    /// Time of the write
    pub at: Instant,
    /// Raw bytes
    pub bytes: Bytes,
}

impl WrittenFrame {
    /// The written bytes as a packet, if they form one
    pub fn packet(&self) -> Option<Esp3Packet> {
        Esp3Packet::parse(&self.bytes).ok()
    }

    /// Whether this is a common command with the given code
    pub fn is_command(&self, code: u8) -> bool {
        self.packet().is_some_and(|p| {
            p.packet_type == PacketType::CommonCommand && p.data.first() == Some(&code)
        })
    }
}

#[derive(Debug)]
struct MockState {
    open: bool,
    incoming: VecDeque<u8>,
    written: Vec<WrittenFrame>,
    open_attempts: Vec<Instant>,
    closes: Vec<Instant>,
    fail_opens: usize,
    fail_writes: bool,
    answer_base_id: Option<DeviceId>,
    answer_version: bool,
    read_timeout: Duration,
}

/// Scripted in-memory transport
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A closed mock that answers identity queries with [`MOCK_BASE_ID`]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                open: false,
                incoming: VecDeque::new(),
                written: Vec::new(),
                open_attempts: Vec::new(),
                closes: Vec::new(),
                fail_opens: 0,
                fail_writes: false,
                answer_base_id: Some(MOCK_BASE_ID),
                answer_version: true,
                read_timeout: Duration::from_millis(500),
            })),
        }
    }

    /// A mock that never answers commands
    pub fn silent() -> Self {
        let mock = Self::new();
        mock.set_answer_commands(None, false);
        mock
    }

    /// Choose what the mock answers to CO_RD_IDBASE and CO_RD_VERSION
    pub fn set_answer_commands(&self, base_id: Option<DeviceId>, version: bool) {
        let mut state = self.state.lock();
        state.answer_base_id = base_id;
        state.answer_version = version;
    }

    /// Queue raw bytes for reading
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().incoming.extend(bytes.iter().copied());
    }

    /// Queue an encoded packet for reading
    pub fn push_packet(&self, packet: &Esp3Packet) {
        self.push_bytes(&packet.build());
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().fail_opens = count;
    }

    /// Make every write fail until cleared
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Simulate the gateway dropping the link
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.incoming.clear();
    }

    /// Set how long an empty read waits
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.state.lock().read_timeout = timeout;
    }

    /// Frames written so far
    pub fn written(&self) -> Vec<WrittenFrame> {
        self.state.lock().written.clone()
    }

    /// Written frames that parse as packets
    pub fn written_packets(&self) -> Vec<Esp3Packet> {
        self.written().iter().filter_map(WrittenFrame::packet).collect()
    }

    /// Written common commands with the given code
    pub fn commands_written(&self, code: u8) -> Vec<WrittenFrame> {
        self.written()
            .into_iter()
            .filter(|frame| frame.is_command(code))
            .collect()
    }

    /// Forget written frames
    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    /// Times of every open attempt
    pub fn open_attempts(&self) -> Vec<Instant> {
        self.state.lock().open_attempts.clone()
    }

    /// Times the transport was closed while open
    pub fn closes(&self) -> Vec<Instant> {
        self.state.lock().closes.clone()
    }

    /// Bytes still waiting to be read
    pub fn pending_input(&self) -> usize {
        self.state.lock().incoming.len()
    }

    fn answer(state: &mut MockState, data: &[u8]) {
        let Ok(packet) = Esp3Packet::parse(data) else {
            return;
        };
        if packet.packet_type != PacketType::CommonCommand {
            return;
        }
        let reply = match packet.data.first() {
            Some(&CO_RD_IDBASE) => state.answer_base_id.map(base_id_response),
            Some(&CO_RD_VERSION) if state.answer_version => Some(version_response()),
            _ => None,
        };
        if let Some(reply) = reply {
            state.incoming.extend(reply.build().iter().copied());
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.open_attempts.push(Instant::now());
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(GatewayError::transport("mock", "scripted open failure"));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.closes.push(Instant::now());
        }
    }

    async fn read(&mut self, n: usize) -> Bytes {
        let wait = {
            let mut state = self.state.lock();
            if state.open && !state.incoming.is_empty() {
                let take = n.min(state.incoming.len());
                let bytes: Vec<u8> = state.incoming.drain(..take).collect();
                return Bytes::from(bytes);
            }
            state.read_timeout
        };
        tokio::time::sleep(wait).await;
        Bytes::new()
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(GatewayError::NotConnected);
        }
        if state.fail_writes {
            state.open = false;
            state.closes.push(Instant::now());
            return Err(GatewayError::transport("mock", "scripted write failure"));
        }
        state.written.push(WrittenFrame {
            at: Instant::now(),
            bytes: Bytes::copy_from_slice(data),
        });
        Self::answer(&mut state, data);
        Ok(())
    }

    async fn flush_input(&mut self) {
        self.state.lock().incoming.clear();
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// RESPONSE frame carrying a base id
pub fn base_id_response(base_id: DeviceId) -> Esp3Packet {
    let mut data = vec![0x00];
    data.extend_from_slice(base_id.as_bytes());
    Esp3Packet::new(PacketType::Response, data, vec![0x0A])
}

/// RESPONSE frame carrying version information
pub fn version_response() -> Esp3Packet {
    let mut data = vec![0x00];
    data.extend_from_slice(&[2, 11, 1, 0]); // app version
    data.extend_from_slice(&[2, 6, 3, 0]); // api version
    data.extend_from_slice(&[0x01, 0x86, 0x5A, 0x3C]); // chip id
    data.extend_from_slice(&[0x45, 0x4F, 0x03, 0x03]); // chip version
    data.extend_from_slice(b"GATEWAYCTRL\0\0\0\0\0");
    Esp3Packet::new(PacketType::Response, data, Bytes::new())
}

/// Received radio telegram with typical optional data (RSSI 70 dBm)
pub fn radio_packet(rorg: u8, payload: &[u8], sender: DeviceId, status: u8) -> Esp3Packet {
    let mut data = vec![rorg];
    data.extend_from_slice(payload);
    data.extend_from_slice(sender.as_bytes());
    data.push(status);
    Esp3Packet::new(
        PacketType::RadioErp1,
        data,
        vec![0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x46, 0x00],
    )
}

/// RPS rocker telegram
pub fn rps_telegram(sender: DeviceId, button: u8, status: u8) -> Esp3Packet {
    radio_packet(rorg::RPS, &[button], sender, status)
}

/// 4BS data telegram
pub fn four_bs_telegram(sender: DeviceId, data: [u8; 4]) -> Esp3Packet {
    radio_packet(rorg::FOUR_BS, &data, sender, 0x00)
}

/// A published state or availability change
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    /// State publication
    State {
        /// Device id
        device: DeviceId,
        /// Published fields
        fields: FieldMap,
    },
    /// Availability publication
    Availability {
        /// Device id
        device: DeviceId,
        /// Whether the device is online
        online: bool,
    },
}

/// Publisher that records everything it is asked to publish
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    publications: Arc<Mutex<Vec<Publication>>>,
}

impl RecordingPublisher {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far
    pub fn publications(&self) -> Vec<Publication> {
        self.publications.lock().clone()
    }

    /// Published states, in order
    pub fn states(&self) -> Vec<(DeviceId, FieldMap)> {
        self.publications
            .lock()
            .iter()
            .filter_map(|p| match p {
                Publication::State { device, fields } => Some((*device, fields.clone())),
                Publication::Availability { .. } => None,
            })
            .collect()
    }
}

impl StatePublisher for RecordingPublisher {
    fn publish_state(&self, device: &DeviceRecord, fields: &FieldMap) {
        self.publications.lock().push(Publication::State {
            device: device.id,
            fields: fields.clone(),
        });
    }

    fn publish_availability(&self, device: &DeviceRecord, online: bool) {
        self.publications.lock().push(Publication::Availability {
            device: device.id,
            online,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enolink_esp3::{parse_base_id, VersionInfo};

    #[test]
    fn test_canned_responses_decode() {
        assert_eq!(parse_base_id(&base_id_response(MOCK_BASE_ID)), Some(MOCK_BASE_ID));
        let version = VersionInfo::from_response(&version_response()).unwrap();
        assert_eq!(version.app_version, "2.11.1.0");
        assert_eq!(version.description, "GATEWAYCTRL");
    }

    #[test]
    fn test_radio_packet_accessors() {
        let sender = DeviceId([0x01, 0x02, 0x03, 0x04]);
        let packet = four_bs_telegram(sender, [0x02, 0x00, 0x64, 0x09]);
        assert_eq!(packet.sender_id(), Some(sender));
        assert_eq!(packet.data_bytes(), &[0x02, 0x00, 0x64, 0x09]);
        assert_eq!(packet.rssi(), Some(-70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_answers_commands() {
        let mut mock = MockTransport::new();
        mock.open().await.unwrap();
        mock.write(&Esp3Packet::read_id_base().build()).await.unwrap();
        assert!(mock.pending_input() > 0);
        assert_eq!(mock.commands_written(CO_RD_IDBASE).len(), 1);

        mock.set_fail_writes(true);
        assert!(mock.write(&[0x55]).await.is_err());
        assert!(!mock.is_open());
        assert_eq!(mock.closes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_read_waits_timeout() {
        let mut mock = MockTransport::new();
        mock.open().await.unwrap();
        let start = Instant::now();
        assert!(mock.read(1).await.is_empty());
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }
}
