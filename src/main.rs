use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teleolink::agent::EndpointAgent;
use teleolink::config::{ConfigStore, EndpointRole};
use teleolink::events::EventBus;
use teleolink::signaling::LinkState;
use teleolink::webrtc::RtcEngine;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Endpoint role as passed on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Teaching,
    Execution,
}

impl RoleArg {
    fn to_role(self) -> EndpointRole {
        match self {
            RoleArg::Teaching => EndpointRole::Teaching,
            RoleArg::Execution => EndpointRole::Execution,
        }
    }
}

/// Teleolink command line arguments
#[derive(Parser, Debug)]
#[command(name = "teleolink")]
#[command(version, about = "WebRTC teleoperation link endpoint", long_about = None)]
struct CliArgs {
    /// Configuration file path (default: <data-dir>/teleolink.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory path (default: /etc/teleolink)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Endpoint role (overrides config)
    #[arg(short = 'r', long, value_name = "ROLE")]
    role: Option<RoleArg>,

    /// Endpoint id announced to the relay (overrides config)
    #[arg(long, value_name = "ID")]
    id: Option<String>,

    /// Signaling relay WebSocket URL (overrides config)
    #[arg(long, value_name = "URL")]
    relay_url: Option<String>,

    /// Call this peer id as soon as the relay link is up
    #[arg(long, value_name = "PEER")]
    call: Option<String>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_json);

    tracing::info!("Starting teleolink v{}", env!("CARGO_PKG_VERSION"));

    // Determine data directory (CLI arg takes precedence)
    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    // Initialize configuration store
    let config_path = args
        .config
        .unwrap_or_else(|| data_dir.join("teleolink.toml"));
    let config_store = ConfigStore::open(&config_path).await?;
    let mut config = (*config_store.get()).clone();

    // Apply CLI argument overrides to config (only if explicitly specified)
    if let Some(role) = args.role {
        config.endpoint.role = role.to_role();
    }
    if let Some(id) = args.id {
        config.endpoint.id = Some(id);
    }
    if let Some(url) = args.relay_url {
        config.signaling.relay_url = url;
    }

    // Create event bus for session notifications
    let events = Arc::new(EventBus::new());

    // Create the peer transport engine
    let engine = Arc::new(RtcEngine::new(config.ice.clone()));
    if config.ice.stun_servers.is_empty() && config.ice.turn_servers.is_empty() {
        tracing::info!("No ICE servers configured, using host candidates only");
    }

    // Log session events as they happen
    spawn_event_logger(events.clone());

    // Connect to the relay and start the routing loop
    let agent = EndpointAgent::connect(engine, &config, events).await?;
    tracing::info!(
        "Registered with relay {} as {} ({})",
        config.signaling.relay_url,
        agent.identity().id,
        agent.identity().device_type
    );

    // Dial the requested peer. The registration frame is already queued
    // ahead of the offer, so ordering on the wire is preserved.
    if let Some(ref peer) = args.call {
        tracing::info!("Calling peer {}", peer);
        if let Err(e) = agent.start_call(peer).await {
            tracing::error!("Call to {} failed: {}", peer, e);
        }
    }

    // Run until interrupted or the relay link is lost
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        tracing::info!("Shutdown signal received");
    };

    let mut link = agent.watch_link();
    let link_lost = async move {
        let _ = link
            .wait_for(|state| matches!(state, LinkState::Closed | LinkState::Failed))
            .await;
    };

    tokio::select! {
        _ = shutdown_signal => {}
        _ = link_lost => {
            tracing::warn!("Signaling link lost");
        }
    }

    agent.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "teleolink=error,webrtc=error",
        LogLevel::Warn => "teleolink=warn,webrtc=warn",
        LogLevel::Info => "teleolink=info,webrtc=warn",
        LogLevel::Verbose => "teleolink=debug,webrtc=warn",
        LogLevel::Debug => "teleolink=debug,webrtc=debug",
        LogLevel::Trace => "teleolink=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    // Check environment variable first
    if let Ok(path) = std::env::var("TELEOLINK_DATA_DIR") {
        return PathBuf::from(path);
    }

    // Default to system configuration directory
    PathBuf::from("/etc/teleolink")
}

/// Spawn a background task that logs every session event
fn spawn_event_logger(events: Arc<EventBus>) {
    let mut rx = events.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(target: "teleolink::events", "{}", json),
                    Err(e) => tracing::debug!("Unserializable event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event logger lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
