//! Connection supervisor
//!
//! The supervisor owns the transport. One task runs [`Supervisor::run`],
//! which keeps the link up, reads frames, forwards radio telegrams and
//! serves requests that arrive through a [`SupervisorHandle`].
//!
//! # Connection lifecycle
//!
//! ```text
//! Closed -> Connecting -> Open -> Degraded -> Closed -> Connecting -> ...
//!                          ^         |
//!                          +---------+  (bytes received)
//! ```
//!
//! - The first connection attempt is immediate; later ones wait the fixed
//!   reconnect delay and are retried indefinitely.
//! - After `idle_threshold` without inbound bytes the link is `Degraded`
//!   and a version query is sent as a ping, at most once per
//!   `ping_interval`.
//! - After `idle_threshold + ping_timeout` without inbound bytes the
//!   transport is closed and the reconnect path takes over.
//! - Base id and version are queried after connecting and every
//!   `info_retry_interval` while unknown; once known they are kept across
//!   reconnects.

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use enolink_esp3::{
    crc8, parse_base_id, DeviceId, Esp3Error, Esp3Packet, VersionInfo, HEADER_LEN, SYNC_BYTE,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::transport::{ConnectionState, Transport};

/// Capacity of the command channel
const COMMAND_QUEUE_SIZE: usize = 32;

/// Requests served by the supervisor task
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Send a radio telegram from the gateway's base id
    SendTelegram {
        /// Destination device
        destination: DeviceId,
        /// Telegram family
        rorg: u8,
        /// Data bytes between RORG and sender id
        data: Vec<u8>,
        /// Status byte
        status: u8,
        /// Write result
        reply: oneshot::Sender<Result<()>>,
    },
    /// Press and release an emulated rocker button
    SendMomentary {
        /// Destination device
        destination: DeviceId,
        /// Rocker button code
        button: u8,
        /// Time between press and release
        press_duration: Duration,
        /// Result of both writes
        reply: oneshot::Sender<Result<()>>,
    },
    /// Resolve the gateway base id
    BaseId {
        /// Base id or the reason it is unknown
        reply: oneshot::Sender<Result<DeviceId>>,
    },
    /// Resolve gateway version information
    VersionInfo {
        /// Version or the reason it is unknown
        reply: oneshot::Sender<Result<VersionInfo>>,
    },
    /// Close the transport and stop
    Shutdown {
        /// Signalled once the transport is closed
        reply: oneshot::Sender<()>,
    },
}

/// Snapshot of the gateway link shared with handles
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    /// Transport name
    pub transport: String,
    /// Current connection state
    pub state: ConnectionState,
    /// When the current state was entered
    pub since: DateTime<Utc>,
    /// Gateway base id, once known
    pub base_id: Option<DeviceId>,
    /// Gateway version, once known
    pub version: Option<VersionInfo>,
    /// When the last frame was received
    pub last_data: Option<DateTime<Utc>>,
    /// Connection attempts so far
    pub connect_attempts: u64,
    /// Radio telegrams forwarded
    pub telegrams_received: u64,
    /// Radio telegrams dropped because the consumer lagged
    pub telegrams_dropped: u64,
}

impl GatewayStatus {
    fn new(transport: &str) -> Self {
        Self {
            transport: transport.to_string(),
            state: ConnectionState::Closed,
            since: Utc::now(),
            base_id: None,
            version: None,
            last_data: None,
            connect_attempts: 0,
            telegrams_received: 0,
            telegrams_dropped: 0,
        }
    }

    /// One-line description such as "disconnected for 12 s"
    pub fn describe(&self, now: DateTime<Utc>) -> String {
        let secs = |from: DateTime<Utc>| (now - from).num_seconds().max(0);
        match self.state {
            ConnectionState::Closed => format!("disconnected for {} s", secs(self.since)),
            ConnectionState::Connecting => {
                format!("connecting (attempt {})", self.connect_attempts)
            }
            ConnectionState::Open => format!("connected for {} s", secs(self.since)),
            ConnectionState::Degraded => format!(
                "connected, no data for {} s",
                secs(self.last_data.unwrap_or(self.since))
            ),
        }
    }
}

/// Cloneable handle to a running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    command_tx: mpsc::Sender<SupervisorCommand>,
    status: Arc<RwLock<GatewayStatus>>,
}

impl SupervisorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> SupervisorCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| GatewayError::ChannelClosed)?;
        response.await.map_err(|_| GatewayError::ChannelClosed)?
    }

    /// Send a radio telegram from the gateway's base id
    pub async fn send_telegram(
        &self,
        destination: DeviceId,
        rorg: u8,
        data: &[u8],
        status: u8,
    ) -> Result<()> {
        let data = data.to_vec();
        self.request(|reply| SupervisorCommand::SendTelegram {
            destination,
            rorg,
            data,
            status,
            reply,
        })
        .await
    }

    /// Press `button`, wait `press_duration`, release
    pub async fn send_momentary(
        &self,
        destination: DeviceId,
        button: u8,
        press_duration: Duration,
    ) -> Result<()> {
        self.request(|reply| SupervisorCommand::SendMomentary {
            destination,
            button,
            press_duration,
            reply,
        })
        .await
    }

    /// Gateway base id (cached once known)
    pub async fn base_id(&self) -> Result<DeviceId> {
        self.request(|reply| SupervisorCommand::BaseId { reply }).await
    }

    /// Gateway version information (cached once known)
    pub async fn version_info(&self) -> Result<VersionInfo> {
        self.request(|reply| SupervisorCommand::VersionInfo { reply })
            .await
    }

    /// Current link status
    pub fn status(&self) -> GatewayStatus {
        self.status.read().clone()
    }

    /// Whether the supervisor task is still accepting requests
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Stop the supervisor and wait for the transport to close
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.command_tx
            .send(SupervisorCommand::Shutdown { reply })
            .await
            .map_err(|_| GatewayError::ChannelClosed)?;
        done.await.map_err(|_| GatewayError::ChannelClosed)
    }
}

/// Owner of the transport and its connection state machine
pub struct Supervisor {
    transport: Box<dyn Transport>,
    config: GatewayConfig,
    command_rx: mpsc::Receiver<SupervisorCommand>,
    commands_closed: bool,
    telegram_tx: mpsc::Sender<Esp3Packet>,
    status: Arc<RwLock<GatewayStatus>>,
    state: ConnectionState,
    base_id: Option<DeviceId>,
    version: Option<VersionInfo>,
    backlog: VecDeque<Esp3Packet>,
    last_rx: Instant,
    last_ping: Option<Instant>,
    next_connect: Instant,
    next_info_query: Instant,
}

impl Supervisor {
    /// Create a supervisor, its handle and the telegram receiver
    pub fn new(
        transport: Box<dyn Transport>,
        config: GatewayConfig,
    ) -> (Self, SupervisorHandle, mpsc::Receiver<Esp3Packet>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (telegram_tx, telegram_rx) = mpsc::channel(config.link.telegram_queue_size.max(1));
        let status = Arc::new(RwLock::new(GatewayStatus::new(transport.name())));
        let now = Instant::now();

        let supervisor = Self {
            transport,
            config,
            command_rx,
            commands_closed: false,
            telegram_tx,
            status: Arc::clone(&status),
            state: ConnectionState::Closed,
            base_id: None,
            version: None,
            backlog: VecDeque::new(),
            last_rx: now,
            last_ping: None,
            next_connect: now,
            next_info_query: now,
        };
        let handle = SupervisorHandle { command_tx, status };
        (supervisor, handle, telegram_rx)
    }

    /// Run until shut down
    ///
    /// Also stops once every handle and the telegram receiver are dropped.
    /// Errors never end the loop.
    pub async fn run(mut self) {
        info!(transport = %self.transport.name(), "Supervisor started");

        loop {
            if self.should_stop() {
                debug!("All handles dropped");
                break;
            }

            if !self.transport.is_open() {
                if self.state.is_connected() {
                    self.mark_closed("transport closed");
                }
                if !self.wait_for_reconnect().await {
                    break;
                }
                if !self.connect().await {
                    continue;
                }
            }

            self.refresh_identity().await;
            self.dispatch_backlog();

            tokio::select! {
                biased;

                command = self.command_rx.recv(), if !self.commands_closed => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => self.commands_closed = true,
                    }
                }

                first = self.transport.read(1) => {
                    if let Some(&byte) = first.first() {
                        self.note_rx();
                        if let Some(packet) = self.read_frame_from(byte).await {
                            self.dispatch(packet);
                        }
                    }
                }
            }

            self.check_keepalive().await;
        }

        self.transport.close().await;
        self.set_state(ConnectionState::Closed);
        info!(transport = %self.transport.name(), "Supervisor stopped");
    }

    /// Whether the link is usable
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn should_stop(&self) -> bool {
        self.commands_closed && self.telegram_tx.is_closed()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "Connection state change");
        self.state = state;
        let mut status = self.status.write();
        status.state = state;
        status.since = Utc::now();
    }

    fn mark_closed(&mut self, reason: &str) {
        warn!(
            transport = %self.transport.name(),
            reason,
            retry_in = ?self.config.reconnect.delay,
            "Gateway link lost"
        );
        self.next_connect = Instant::now() + self.config.reconnect.delay;
        self.last_ping = None;
        self.set_state(ConnectionState::Closed);
    }

    /// Wait for the next connection attempt, serving requests meanwhile
    ///
    /// Returns `false` when a shutdown arrives.
    async fn wait_for_reconnect(&mut self) -> bool {
        loop {
            if self.should_stop() {
                return false;
            }
            let deadline = self.next_connect;
            if Instant::now() >= deadline {
                return true;
            }

            tokio::select! {
                biased;

                command = self.command_rx.recv(), if !self.commands_closed => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                return false;
                            }
                        }
                        None => self.commands_closed = true,
                    }
                }

                _ = sleep_until(deadline) => return true,
            }
        }
    }

    async fn connect(&mut self) -> bool {
        self.set_state(ConnectionState::Connecting);
        let attempt = {
            let mut status = self.status.write();
            status.connect_attempts += 1;
            status.connect_attempts
        };
        info!(transport = %self.transport.name(), attempt, "Connecting to gateway");

        match self.transport.open().await {
            Ok(()) => {
                let now = Instant::now();
                self.last_rx = now;
                self.last_ping = None;
                self.next_info_query = now;
                self.set_state(ConnectionState::Open);
                info!(transport = %self.transport.name(), attempt, "Gateway connected");
                true
            }
            Err(e) => {
                warn!(
                    transport = %self.transport.name(),
                    error = %e,
                    code = e.error_code(),
                    retry_in = ?self.config.reconnect.delay,
                    "Connection attempt failed"
                );
                self.next_connect = Instant::now() + self.config.reconnect.delay;
                self.set_state(ConnectionState::Closed);
                false
            }
        }
    }

    fn note_rx(&mut self) {
        self.last_rx = Instant::now();
        self.last_ping = None;
        if self.state == ConnectionState::Degraded {
            info!(transport = %self.transport.name(), "Gateway responding again");
            self.set_state(ConnectionState::Open);
        }
    }

    async fn read_exact(&mut self, n: usize) -> Option<BytesMut> {
        let mut buf = BytesMut::with_capacity(n);
        while buf.len() < n {
            let chunk = self.transport.read(n - buf.len()).await;
            if chunk.is_empty() {
                return None;
            }
            self.note_rx();
            buf.extend_from_slice(&chunk);
        }
        Some(buf)
    }

    /// Read one frame
    ///
    /// Reads a single byte looking for the sync marker, then the rest of
    /// the frame. Returns `None` on a short read or an invalid frame.
    pub async fn read_frame(&mut self) -> Option<Esp3Packet> {
        let first = self.transport.read(1).await;
        let &byte = first.first()?;
        self.note_rx();
        self.read_frame_from(byte).await
    }

    async fn read_frame_from(&mut self, first: u8) -> Option<Esp3Packet> {
        if first != SYNC_BYTE {
            trace!(byte = first, "Skipping byte outside a frame");
            return None;
        }

        let Some(header) = self.read_exact(HEADER_LEN + 1).await else {
            debug!("Short read in frame header");
            return None;
        };
        let expected = crc8(&header[..HEADER_LEN]);
        if expected != header[HEADER_LEN] {
            warn!(
                expected = expected,
                got = header[HEADER_LEN],
                "Header checksum mismatch, resynchronizing"
            );
            return None;
        }

        let data_len = u16::from_be_bytes([header[0], header[1]]) as usize;
        let optional_len = header[2] as usize;
        let Some(body) = self.read_exact(data_len + optional_len + 1).await else {
            debug!(data_len, optional_len, "Short read in frame body");
            return None;
        };

        let mut raw = BytesMut::with_capacity(1 + header.len() + body.len());
        raw.extend_from_slice(&[SYNC_BYTE]);
        raw.extend_from_slice(&header);
        raw.extend_from_slice(&body);

        match Esp3Packet::parse(&raw) {
            Ok(packet) => {
                trace!(packet = %packet, "Frame received");
                self.status.write().last_data = Some(Utc::now());
                Some(packet)
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Dropping invalid frame");
                None
            }
        }
    }

    /// Write one frame
    ///
    /// A failed write leaves the transport closed and schedules a
    /// reconnect.
    pub async fn write_frame(&mut self, packet: &Esp3Packet) -> Result<()> {
        if !self.transport.is_open() {
            return Err(GatewayError::NotConnected);
        }
        trace!(packet = %packet, "Writing frame");
        match self.transport.write(&packet.build()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "Frame write failed");
                self.transport.close().await;
                self.mark_closed("write failed");
                Err(e)
            }
        }
    }

    /// Write `packet` and wait for the next RESPONSE frame
    ///
    /// Radio telegrams read while waiting are kept and forwarded afterwards.
    pub async fn send_and_await_response(
        &mut self,
        packet: &Esp3Packet,
        timeout: Duration,
    ) -> Result<Esp3Packet> {
        self.write_frame(packet).await?;
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if !self.transport.is_open() {
                return Err(GatewayError::NotConnected);
            }
            match self.read_frame().await {
                Some(frame) if frame.is_response() => return Ok(frame),
                Some(frame) if frame.is_radio() => self.backlog.push_back(frame),
                Some(frame) => debug!(packet = %frame, "Ignoring frame while awaiting response"),
                None => {}
            }
        }

        Err(GatewayError::ResponseTimeout {
            duration_ms: timeout.as_millis() as u64,
        })
    }

    async fn query_base_id(&mut self) -> Result<DeviceId> {
        let timeout = self.config.link.response_timeout;
        let response = self
            .send_and_await_response(&Esp3Packet::read_id_base(), timeout)
            .await?;
        let base_id = parse_base_id(&response).ok_or(GatewayError::NoBaseId)?;
        info!(base_id = %base_id, "Gateway base id");
        self.base_id = Some(base_id);
        self.status.write().base_id = Some(base_id);
        Ok(base_id)
    }

    async fn query_version(&mut self) -> Result<VersionInfo> {
        let timeout = self.config.link.response_timeout;
        let response = self
            .send_and_await_response(&Esp3Packet::read_version(), timeout)
            .await?;
        let version = VersionInfo::from_response(&response).ok_or_else(|| {
            GatewayError::Frame(Esp3Error::Truncated {
                needed: 33,
                available: response.data.len(),
            })
        })?;
        info!(
            app = %version.app_version,
            api = %version.api_version,
            chip = %version.chip_id,
            description = %version.description,
            "Gateway version"
        );
        self.version = Some(version.clone());
        self.status.write().version = Some(version.clone());
        Ok(version)
    }

    /// Gateway base id, queried once if not cached
    pub async fn base_id(&mut self) -> Result<DeviceId> {
        match self.base_id {
            Some(base_id) => Ok(base_id),
            None => self.query_base_id().await,
        }
    }

    /// Gateway version, queried once if not cached
    pub async fn version_info(&mut self) -> Result<VersionInfo> {
        match &self.version {
            Some(version) => Ok(version.clone()),
            None => self.query_version().await,
        }
    }

    async fn refresh_identity(&mut self) {
        if self.base_id.is_some() && self.version.is_some() {
            return;
        }
        let now = Instant::now();
        if now < self.next_info_query {
            return;
        }
        self.next_info_query = now + self.config.link.info_retry_interval;

        if self.base_id.is_none() {
            if let Err(e) = self.query_base_id().await {
                warn!(error = %e, retry_in = ?self.config.link.info_retry_interval, "Base id query failed");
            }
        }
        if self.version.is_none() && self.transport.is_open() {
            if let Err(e) = self.query_version().await {
                warn!(error = %e, retry_in = ?self.config.link.info_retry_interval, "Version query failed");
            }
        }
    }

    /// Send a radio telegram from the base id
    pub async fn send_telegram(
        &mut self,
        destination: DeviceId,
        rorg: u8,
        data: &[u8],
        status: u8,
    ) -> Result<()> {
        let base_id = self.base_id().await?;
        let packet = Esp3Packet::radio_telegram(base_id, destination, rorg, data, status);
        self.write_frame(&packet).await?;
        debug!(destination = %destination, rorg = rorg, data = ?data, "Telegram sent");
        Ok(())
    }

    /// Press and release an emulated rocker button
    ///
    /// Succeeds only if both writes succeed.
    pub async fn send_momentary(
        &mut self,
        destination: DeviceId,
        button: u8,
        press_duration: Duration,
    ) -> Result<()> {
        let base_id = self.base_id().await?;
        self.write_frame(&Esp3Packet::rps_press(base_id, destination, button))
            .await?;
        sleep(press_duration).await;
        self.write_frame(&Esp3Packet::rps_release(base_id, destination))
            .await?;
        debug!(destination = %destination, button = button, "Button pressed and released");
        Ok(())
    }

    /// Serve one request; returns `false` on shutdown
    async fn handle_command(&mut self, command: SupervisorCommand) -> bool {
        match command {
            SupervisorCommand::SendTelegram {
                destination,
                rorg,
                data,
                status,
                reply,
            } => {
                let result = self.send_telegram(destination, rorg, &data, status).await;
                let _ = reply.send(result);
            }
            SupervisorCommand::SendMomentary {
                destination,
                button,
                press_duration,
                reply,
            } => {
                let result = self.send_momentary(destination, button, press_duration).await;
                let _ = reply.send(result);
            }
            SupervisorCommand::BaseId { reply } => {
                let result = self.base_id().await;
                let _ = reply.send(result);
            }
            SupervisorCommand::VersionInfo { reply } => {
                let result = self.version_info().await;
                let _ = reply.send(result);
            }
            SupervisorCommand::Shutdown { reply } => {
                info!("Supervisor shutdown requested");
                self.transport.close().await;
                self.set_state(ConnectionState::Closed);
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn dispatch(&mut self, packet: Esp3Packet) {
        if packet.is_radio() {
            self.forward(packet);
        } else if packet.is_response() {
            debug!(packet = %packet, "Response frame (keepalive answer)");
        } else {
            debug!(packet = %packet, "Ignoring frame");
        }
    }

    fn dispatch_backlog(&mut self) {
        while let Some(packet) = self.backlog.pop_front() {
            self.forward(packet);
        }
    }

    fn forward(&mut self, packet: Esp3Packet) {
        match self.telegram_tx.try_send(packet) {
            Ok(()) => self.status.write().telegrams_received += 1,
            Err(mpsc::error::TrySendError::Full(packet)) => {
                warn!(sender = ?packet.sender_id(), "Telegram queue full, dropping telegram");
                self.status.write().telegrams_dropped += 1;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Telegram receiver gone");
            }
        }
    }

    async fn check_keepalive(&mut self) {
        if !self.transport.is_open() {
            return;
        }
        let keepalive = &self.config.keepalive;
        let (idle_threshold, ping_interval, dead_after) = (
            keepalive.idle_threshold,
            keepalive.ping_interval,
            keepalive.dead_after(),
        );
        let idle = self.last_rx.elapsed();

        if idle >= dead_after {
            warn!(idle = ?idle, "No data from gateway, closing link");
            self.transport.close().await;
            self.mark_closed("keepalive timeout");
            return;
        }

        if idle < idle_threshold {
            return;
        }

        if self.state == ConnectionState::Open {
            warn!(idle = ?idle, "Gateway silent, link degraded");
            self.set_state(ConnectionState::Degraded);
        }

        let due = self
            .last_ping
            .map_or(true, |sent| sent.elapsed() >= ping_interval);
        if due {
            self.last_ping = Some(Instant::now());
            debug!(idle = ?idle, "Sending keepalive ping");
            if let Err(e) = self.write_frame(&Esp3Packet::read_version()).await {
                warn!(error = %e, "Keepalive ping failed");
            }
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("transport", &self.transport.name())
            .field("state", &self.state)
            .field("base_id", &self.base_id)
            .finish()
    }
}
