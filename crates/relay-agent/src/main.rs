//! # relay-agent
//!
//! Runs one side of a relay message service: opens the channel in the
//! requested role, sends a timestamp every interval and logs whatever the
//! other side sends back.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{Local, Timelike};
use clap::{Parser, Subcommand};
use relay_channel::{Channel, ChannelState, Role, ShutdownCoordinator, StreamHub};
use relay_core::{FaultReporter, Message};
use relay_settings::RelaySettings;
use relay_store::{MemoryStore, SharedStore};
use serde_json::{Value, json};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Relay demo agent.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Runs one side of a relay message service")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// Service to open.
    #[arg(long, global = true, default_value = "MessageService")]
    service: String,

    /// Milliseconds between outgoing messages.
    #[arg(long, global = true, default_value_t = 1_000)]
    interval_ms: u64,

    /// Settings file (defaults to `RELAY_SETTINGS_PATH` or `~/.relay/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Keep a persisted queue in process memory instead of Redis.
    #[arg(long, global = true)]
    memory_store: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Listen for the initiator.
    Accept,
    /// Dial the acceptor.
    Initiate,
}

impl Mode {
    fn role(self) -> Role {
        match self {
            Self::Accept => Role::Acceptor,
            Self::Initiate => Role::Initiator,
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<RelaySettings> {
    let settings = match path {
        Some(path) => relay_settings::loader::load_settings_from_path(path),
        None => relay_settings::load_settings(),
    };
    settings.context("Failed to load settings")
}

fn init_logging(settings: &RelaySettings) {
    if settings.logging.json {
        relay_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        relay_core::logging::init_subscriber(&settings.logging.level);
    }
}

/// Store backing the outgoing queue, if the queue is persisted at all.
fn open_store(
    settings: &RelaySettings,
    memory_store: bool,
    reporter: &FaultReporter,
) -> Result<Option<SharedStore>> {
    if !settings.channel.persist_queue {
        return Ok(None);
    }
    if memory_store {
        info!("persisting outgoing queue in process memory");
        return Ok(Some(Arc::new(MemoryStore::new())));
    }
    let store = relay_store::connect_redis(&settings.store, reporter.clone())
        .with_context(|| format!("Failed to open store at {}", settings.store.url))?;
    info!(url = %settings.store.url, "persisting outgoing queue in store");
    Ok(Some(store))
}

fn seconds_since_midnight() -> u32 {
    Local::now().num_seconds_from_midnight()
}

fn tick_payload(role: Role) -> Value {
    json!({ "side": role.side(), "value": seconds_since_midnight() })
}

/// Send one message per interval until `stop` fires. Sends run detached so a
/// reconnect never delays the next tick.
async fn run_ticks(channel: Arc<Channel>, interval: Duration, stop: CancellationToken) {
    let role = channel.config().role;
    let service = channel.config().service.clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let message = Message::new(tick_payload(role)).with_service(service.clone());
                let channel = channel.clone();
                drop(tokio::spawn(async move {
                    if let Err(err) = channel.send(message).await {
                        warn!(error = %err, "send failed");
                    }
                }));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_ref())?;
    init_logging(&settings);

    let reporter = FaultReporter::log_only();
    let store = open_store(&settings, cli.memory_store, &reporter)?;
    let hub = StreamHub::new(&settings, store, reporter);

    let role = cli.mode.role();
    let channel = hub
        .open(&cli.service, role, |message: Message| async move {
            info!(service = %message.service_name, data = %message.data, "received");
        })
        .await
        .with_context(|| format!("Failed to open {}", cli.service))?;
    info!(service = %cli.service, %role, interval_ms = cli.interval_ms, "agent started");

    let coordinator = ShutdownCoordinator::new();
    let signals = coordinator.listen_for_signals();
    let mut states = channel.subscribe();

    let failed = tokio::select! {
        () = run_ticks(channel.clone(), Duration::from_millis(cli.interval_ms.max(1)), coordinator.token()) => false,
        state = states.wait_for(|s| s.is_terminal()) => state.is_ok_and(|s| *s == ChannelState::Failed),
    };

    info!("shutting down");
    coordinator.shutdown();
    hub.shutdown().await;
    let _ = signals.await;

    if failed {
        error!(service = %cli.service, %role, "channel failed");
        bail!("channel {} failed", cli.service);
    }
    info!("shutdown complete");
    Ok(())
}
