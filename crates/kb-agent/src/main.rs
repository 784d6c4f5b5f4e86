//! kiosk-bridge Agent Daemon
//!
//! The agent runs on a kiosk, opens an outbound tunnel to the hub and
//! routes every call it receives to a local HTTP service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kb_agent::{health, AgentState, ConnectionManager, HttpRouter, RoutingTable, TcpConnector};
use kb_core::config::{self, AgentConfig};
use kb_core::error::ConfigError;
use kb_core::LocalRouter;

#[derive(Parser)]
#[command(name = "kb-agent")]
#[command(about = "kiosk-bridge agent - tunnels hub calls to local services")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hub address (overrides config)
    #[arg(long)]
    hub: Option<String>,

    /// Bearer credential (overrides config)
    #[arg(long, env = "KB_AGENT_CREDENTIAL", hide_env_values = true)]
    credential: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("kiosk-bridge agent starting...");

    let mut config = load_config(args.config.as_ref())?;

    // Apply command-line overrides
    if let Some(hub) = args.hub {
        config.hub_address = hub;
    }
    if let Some(credential) = args.credential {
        config.credential = credential;
    }
    config.validate().context("Invalid agent configuration")?;

    let table = RoutingTable::from_config(&config).context("Invalid routing table")?;
    if table.is_empty() {
        tracing::warn!("No routes configured - every call will be answered with route_not_found");
    } else {
        tracing::info!("Loaded {} routes", table.len());
    }
    let router: Arc<dyn LocalRouter> = Arc::new(HttpRouter::new(table));

    let connector = TcpConnector::new(config.hub_address.clone(), config.connect_timeout);
    let health_bind = config.health_bind.clone();
    let manager = ConnectionManager::new(config, connector, Arc::clone(&router));

    let cancel = manager.shutdown_token();
    spawn_signal_handler(cancel.clone());

    if let Some(bind) = health_bind {
        let state = AgentState::new(manager.state(), manager.metrics(), router.route_count());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(&bind, state, cancel).await {
                tracing::error!("Health endpoint failed: {:#}", e);
            }
        });
    }

    manager.run().await;

    tracing::info!("Agent shutdown complete");
    Ok(())
}

/// Load the config file, falling back to defaults when none exists
fn load_config(path: Option<&PathBuf>) -> Result<AgentConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path("agent");
    match config::load_config(&default_path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            tracing::info!("Using default configuration");
            Ok(AgentConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load config from {:?}", default_path)),
    }
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
