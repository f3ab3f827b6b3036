//! Integration tests for the gateway bridge
//!
//! These tests run the supervisor, tracker and bridge together:
//! - Telegram flow from a scripted gateway to published state
//! - Command confirmation and timeout through the tracker callbacks
//! - A fake TCP gateway for the real transport, including reconnects

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enolink_eep::{Command, Profile, ProfileLibrary};
use enolink_esp3::{DeviceId, Esp3Packet, PacketType, CO_RD_IDBASE, CO_RD_VERSION};
use enolink_gateway::test_utils::{
    base_id_response, four_bs_telegram, version_response, MockTransport, RecordingPublisher,
};
use enolink_gateway::{
    Bridge, CommandTracker, ConnectionState, DeviceRecord, GatewayConfig, GatewayConfigBuilder,
    MemoryRegistry, Supervisor, SupervisorHandle, TcpTransport,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const DIMMER: DeviceId = DeviceId([0x05, 0x83, 0xF0, 0xA4]);
const GATEWAY_BASE: DeviceId = DeviceId([0xFF, 0xA1, 0x22, 0x00]);

// ============================================================================
// Fixtures
// ============================================================================

struct Counters {
    confirmed: Arc<AtomicUsize>,
    timed_out: Arc<AtomicUsize>,
}

fn dimmer_profiles() -> ProfileLibrary {
    let profile: Profile = serde_json::from_value(json!({
        "eep": "A5-38-08",
        "type_title": "Central Command Gateway",
        "rorg_number": "0xA5", "func_number": "0x38", "type_number": "0x08",
        "case": [
            { "data": "0x02006409", "datafield": [{ "shortcut": "switch", "value": "1" }] },
            { "data": "0x02000008", "datafield": [{ "shortcut": "switch", "value": "0" }] }
        ]
    }))
    .unwrap();
    ProfileLibrary::from_profiles([profile])
}

fn start_bridge(mock: &MockTransport, config: GatewayConfig) -> (Arc<Bridge>, RecordingPublisher, Counters) {
    let (supervisor, handle, telegrams) = Supervisor::new(Box::new(mock.clone()), config.clone());
    tokio::spawn(supervisor.run());

    let confirmed = Arc::new(AtomicUsize::new(0));
    let timed_out = Arc::new(AtomicUsize::new(0));
    let (c, t) = (Arc::clone(&confirmed), Arc::clone(&timed_out));
    let tracker = Arc::new(CommandTracker::new(
        config.commands.sweep_interval,
        move |_, _, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
        },
        move |_, _, _| {
            t.fetch_add(1, Ordering::SeqCst);
        },
    ));
    tracker.start();

    let publisher = RecordingPublisher::new();
    let bridge = Arc::new(Bridge::new(
        handle,
        tracker,
        Arc::new(MemoryRegistry::from_records([DeviceRecord::new(
            DIMMER,
            "Kitchen dimmer",
            "A5-38-08",
        )])),
        Arc::new(dimmer_profiles()),
        Arc::new(publisher.clone()),
        config.commands,
    ));

    let runner = Arc::clone(&bridge);
    tokio::spawn(async move { runner.run(telegrams).await });

    (bridge, publisher, Counters { confirmed, timed_out })
}

// ============================================================================
// Telegram Flow
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_telegram_to_published_state() {
    let mock = MockTransport::new();
    let (bridge, publisher, _counters) = start_bridge(&mock, GatewayConfig::default());

    mock.push_packet(&four_bs_telegram(DIMMER, [0x02, 0x00, 0x00, 0x08]));
    tokio::time::sleep(Duration::from_secs(2)).await;

    let states = publisher.states();
    assert_eq!(states.len(), 1);
    let (device, fields) = &states[0];
    assert_eq!(*device, DIMMER);
    assert_eq!(fields["switch"], json!(0));
    assert_eq!(fields["rssi"], json!(-70));
    assert!(fields.contains_key("last_seen"));
    assert_eq!(bridge.stats().published, 1);
}

#[tokio::test(start_paused = true)]
async fn test_garbage_between_telegrams() {
    let mock = MockTransport::new();
    let (_bridge, publisher, _counters) = start_bridge(&mock, GatewayConfig::default());

    mock.push_bytes(&[0x00, 0x55, 0x00]);
    mock.push_packet(&four_bs_telegram(DIMMER, [0x02, 0x00, 0x64, 0x09]));
    tokio::time::sleep(Duration::from_secs(3)).await;
    mock.push_packet(&four_bs_telegram(DIMMER, [0x02, 0x00, 0x00, 0x08]));
    tokio::time::sleep(Duration::from_secs(2)).await;

    let values: Vec<_> = publisher
        .states()
        .into_iter()
        .map(|(_, fields)| fields["switch"].clone())
        .collect();
    assert_eq!(values.last(), Some(&json!(0)));
}

// ============================================================================
// Command Tracking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_command_confirmed_once() {
    let mock = MockTransport::new();
    let (bridge, _publisher, counters) = start_bridge(&mock, GatewayConfig::default());
    tokio::time::sleep(Duration::from_secs(1)).await;

    bridge
        .handle_command_payload(DIMMER, "switch", &json!({"state": "ON"}))
        .await
        .unwrap();

    // Device echoes its new state twice
    mock.push_packet(&four_bs_telegram(DIMMER, [0x02, 0x00, 0x64, 0x09]));
    mock.push_packet(&four_bs_telegram(DIMMER, [0x02, 0x00, 0x64, 0x09]));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(counters.confirmed.load(Ordering::SeqCst), 1);
    assert_eq!(counters.timed_out.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_command_times_out_once() {
    let mock = MockTransport::new();
    let config = GatewayConfigBuilder::new()
        .confirm_timeout(Duration::from_secs(3))
        .build();
    let (bridge, _publisher, counters) = start_bridge(&mock, config);
    tokio::time::sleep(Duration::from_secs(1)).await;

    bridge
        .handle_command(DIMMER, "switch", Command::Switch(false))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(counters.timed_out.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(counters.timed_out.load(Ordering::SeqCst), 1);
    assert_eq!(counters.confirmed.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bridge_shutdown() {
    let mock = MockTransport::new();
    let (bridge, _publisher, _counters) = start_bridge(&mock, GatewayConfig::default());
    tokio::time::sleep(Duration::from_secs(1)).await;

    bridge.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!mock.closes().is_empty());

    let err = bridge
        .handle_command(DIMMER, "switch", Command::Switch(true))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CHANNEL_CLOSED");
}

// ============================================================================
// TCP Gateway
// ============================================================================

/// Read one frame from the bridge side of the socket
async fn read_frame(socket: &mut TcpStream) -> Option<Esp3Packet> {
    let mut header = [0u8; 6];
    socket.read_exact(&mut header).await.ok()?;
    let body_len = u16::from_be_bytes([header[1], header[2]]) as usize + header[3] as usize + 1;
    let mut body = vec![0u8; body_len];
    socket.read_exact(&mut body).await.ok()?;
    let mut raw = header.to_vec();
    raw.extend_from_slice(&body);
    Esp3Packet::parse(&raw).ok()
}

/// Answer identity queries the way a USB300 behind ser2net does
async fn serve_gateway(mut socket: TcpStream, telegram: Option<Esp3Packet>) {
    let mut telegram = telegram;
    while let Some(frame) = read_frame(&mut socket).await {
        if frame.packet_type != PacketType::CommonCommand {
            continue;
        }
        let reply = match frame.data.first() {
            Some(&CO_RD_IDBASE) => base_id_response(GATEWAY_BASE),
            Some(&CO_RD_VERSION) => version_response(),
            _ => continue,
        };
        if socket.write_all(&reply.build()).await.is_err() {
            return;
        }
        if let Some(packet) = telegram.take() {
            if socket.write_all(&packet.build()).await.is_err() {
                return;
            }
        }
    }
}

fn tcp_supervisor(port: u16, config: GatewayConfig) -> (SupervisorHandle, tokio::sync::mpsc::Receiver<Esp3Packet>) {
    let transport = TcpTransport::new("127.0.0.1", port)
        .with_read_timeout(Duration::from_millis(100))
        .with_connect_timeout(Duration::from_secs(1));
    let (supervisor, handle, telegrams) = Supervisor::new(Box::new(transport), config);
    tokio::spawn(supervisor.run());
    (handle, telegrams)
}

#[tokio::test]
async fn test_tcp_gateway_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let telegram = four_bs_telegram(DIMMER, [0x02, 0x00, 0x64, 0x09]);

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        serve_gateway(socket, Some(telegram)).await;
    });

    let (handle, mut telegrams) = tcp_supervisor(port, GatewayConfig::default());

    let packet = tokio::time::timeout(Duration::from_secs(10), telegrams.recv())
        .await
        .expect("telegram within timeout")
        .unwrap();
    assert_eq!(packet.sender_id(), Some(DIMMER));
    assert_eq!(handle.base_id().await.unwrap(), GATEWAY_BASE);
    assert_eq!(handle.version_info().await.unwrap().app_version, "2.11.1.0");

    handle
        .send_telegram(DIMMER, 0xA5, &[0x02, 0x00, 0x00, 0x08], 0x00)
        .await
        .unwrap();
    assert_eq!(handle.status().state, ConnectionState::Open);

    handle.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("gateway sees the close")
        .unwrap();
}

#[tokio::test]
async fn test_tcp_gateway_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        // First session: answer identity queries, then hang up
        let (mut socket, _) = listener.accept().await.unwrap();
        for _ in 0..2 {
            if let Some(frame) = read_frame(&mut socket).await {
                let reply = match frame.data.first() {
                    Some(&CO_RD_IDBASE) => base_id_response(GATEWAY_BASE),
                    _ => version_response(),
                };
                socket.write_all(&reply.build()).await.unwrap();
            }
        }
        drop(socket);

        // Second session: identity is cached, so nothing is asked. Input that
        // arrives while connecting is discarded, hence the pause.
        let (mut socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let telegram = four_bs_telegram(DIMMER, [0x02, 0x00, 0x00, 0x08]);
        socket.write_all(&telegram.build()).await.unwrap();
        serve_gateway(socket, None).await;
    });

    let config = GatewayConfigBuilder::new()
        .reconnect_delay(Duration::from_millis(200))
        .build();
    let (handle, mut telegrams) = tcp_supervisor(port, config);

    let packet = tokio::time::timeout(Duration::from_secs(10), telegrams.recv())
        .await
        .expect("telegram after reconnect")
        .unwrap();
    assert_eq!(packet.data_bytes(), &[0x02, 0x00, 0x00, 0x08]);

    let status = handle.status();
    assert!(status.connect_attempts >= 2);
    assert_eq!(status.base_id, Some(GATEWAY_BASE));

    handle.shutdown().await.unwrap();
    server.abort();
}
