//! Enolink Node - EnOcean gateway bridge
//!
//! This binary runs a complete bridge:
//! - Gateway link over a USB stick or TCP, with reconnects and keepalive
//! - Profile decoding of telegrams from configured devices
//! - State publication as JSON log lines on the `enolink::bus` target
//! - Entity commands read line by line from stdin

mod publisher;
mod requests;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use enolink_eep::ProfileLibrary;
use enolink_gateway::{
    transport, Bridge, CommandTracker, ConnectionConfig, GatewayConfig, MemoryRegistry,
    Supervisor, SupervisorHandle,
};
use publisher::LogPublisher;
use requests::{parse_line, Query, Request};

#[derive(Parser)]
#[command(name = "enolink-node")]
#[command(about = "EnOcean gateway bridge")]
struct Args {
    /// Gateway connection: serial port path or tcp://host:port
    #[arg(long, short)]
    connection: Option<String>,

    /// Directory of EEP profile JSON files
    #[arg(long, short, default_value = "profiles")]
    profiles: PathBuf,

    /// JSON device list
    #[arg(long, short)]
    devices: Option<PathBuf>,

    /// Gateway configuration (JSON, durations like "30s")
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

/// Everything the request loop needs
struct Node {
    bridge: Arc<Bridge>,
    gateway: SupervisorHandle,
    profiles: Arc<ProfileLibrary>,
    registry: Arc<MemoryRegistry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(
        version = enolink_gateway::VERSION,
        gateway = %config.connection.target(),
        "Starting Enolink Node"
    );

    let profiles = Arc::new(
        ProfileLibrary::load_dir(&args.profiles)
            .with_context(|| format!("loading profiles from {}", args.profiles.display()))?,
    );
    if profiles.is_empty() {
        warn!(path = %args.profiles.display(), "No profiles loaded, nothing will be decoded");
    }

    let registry = Arc::new(match &args.devices {
        Some(path) => MemoryRegistry::load_file(path)
            .with_context(|| format!("loading devices from {}", path.display()))?,
        None => {
            warn!("No device list given, only teach-ins will be reported");
            MemoryRegistry::new()
        }
    });
    for device in registry.records() {
        if !profiles.contains(&device.eep) {
            warn!(device = %device.id, eep = %device.eep, "Device profile not found");
        }
    }

    let transport = transport::from_config(&config)?;
    let (supervisor, gateway, telegrams) = Supervisor::new(transport, config.clone());
    let supervisor_task = tokio::spawn(supervisor.run());

    let tracker = Arc::new(CommandTracker::new(
        config.commands.sweep_interval,
        |device, entity, command, fields| {
            info!(device = %device, entity, command = command.kind(), ?fields, "Command confirmed");
        },
        |device, entity, command| {
            warn!(device = %device, entity, command = command.kind(), "Command not confirmed");
        },
    ));
    tracker.start();

    let bridge = Arc::new(Bridge::new(
        gateway.clone(),
        tracker,
        registry.clone(),
        profiles.clone(),
        Arc::new(LogPublisher),
        config.commands.clone(),
    ));

    let runner = Arc::clone(&bridge);
    let bridge_task = tokio::spawn(async move { runner.run(telegrams).await });

    let node = Node {
        bridge,
        gateway,
        profiles,
        registry,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !until_interrupted(ctrl_c.as_mut(), node.handle_line(&line)).await {
                        info!("Interrupted during a request, shutting down");
                        break;
                    }
                }
                Ok(None) => {
                    info!("Stdin closed, running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Cannot read stdin");
                    stdin_open = false;
                }
            },
        }
    }

    node.bridge.shutdown().await?;
    if let Err(e) = supervisor_task.await {
        error!(error = %e, "Supervisor task failed");
    }
    if let Err(e) = bridge_task.await {
        error!(error = %e, "Bridge task failed");
    }
    info!(stats = ?node.bridge.stats(), "Stopped");
    Ok(())
}

/// Run `work` to completion unless `interrupt` resolves first.
/// Returns false when interrupted.
async fn until_interrupted<I, W>(interrupt: Pin<&mut I>, work: W) -> bool
where
    I: Future,
    W: Future<Output = ()>,
{
    tokio::select! {
        _ = interrupt => false,
        _ = work => true,
    }
}

/// Configuration file (if any) with the command line connection applied
fn load_config(args: &Args) -> anyhow::Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            GatewayConfig::from_json(&json)?
        }
        None => GatewayConfig::default(),
    };
    if let Some(connection) = &args.connection {
        config.connection = connection.parse::<ConnectionConfig>()?;
    }
    config.validate()?;
    Ok(config)
}

impl Node {
    async fn handle_line(&self, line: &str) {
        let request = match parse_line(line) {
            None => return,
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                warn!(error = %e, line, "Ignoring malformed request");
                return;
            }
        };

        match request {
            Request::Command {
                device,
                entity,
                payload,
            } => {
                if let Err(e) = self
                    .bridge
                    .handle_command_payload(device, &entity, &payload)
                    .await
                {
                    warn!(device = %device, entity = %entity, code = e.error_code(), error = %e, "Command failed");
                }
            }
            Request::Query { query: Query::Status } => {
                let status = self.gateway.status();
                info!(
                    gateway = %status.transport,
                    base_id = ?status.base_id.map(|id| id.to_string()),
                    received = status.telegrams_received,
                    dropped = status.telegrams_dropped,
                    bridge = ?self.bridge.stats(),
                    "{}",
                    status.describe(chrono::Utc::now())
                );
            }
            Request::Query { query: Query::Devices } => {
                for device in self.registry.records() {
                    let seen = self.registry.last_seen(device.id);
                    info!(
                        device = %device.id,
                        name = %device.name,
                        eep = %device.eep,
                        enabled = device.enabled,
                        last_seen = ?seen.map(|s| s.at),
                        rssi = ?seen.and_then(|s| s.rssi),
                        "Device"
                    );
                }
            }
            Request::Query { query: Query::Reload } => match self.profiles.reload() {
                Ok(count) => info!(profiles = count, "Profiles reloaded"),
                Err(e) => warn!(error = %e, "Profile reload failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_request_finishes_before_interrupt() {
        let interrupt = tokio::time::sleep(Duration::from_secs(60));
        tokio::pin!(interrupt);
        let work = tokio::time::sleep(Duration::from_millis(10));
        assert!(until_interrupted(interrupt.as_mut(), work).await);
        assert!(!interrupt.is_elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cuts_stalled_request() {
        let interrupt = tokio::time::sleep(Duration::from_millis(10));
        tokio::pin!(interrupt);
        // A command stuck waiting on the gateway
        let work = std::future::pending::<()>();
        assert!(!until_interrupted(interrupt.as_mut(), work).await);
    }
}
