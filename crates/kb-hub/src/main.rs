//! kiosk-bridge Hub Daemon
//!
//! The hub runs in the cloud and accepts the tunnels kiosk agents open to
//! it, so that calls can be dispatched to services behind the kiosks' NAT.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kb_core::config::{self, HubConfig};
use kb_core::error::ConfigError;
use kb_core::Identity;
use kb_hub::auth::StaticCredentials;
use kb_hub::{health, HubState, TunnelServer};

#[derive(Parser)]
#[command(name = "kb-hub")]
#[command(about = "kiosk-bridge hub daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

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

    tracing::info!("kiosk-bridge hub starting...");

    let mut config = load_config(args.config.as_ref())?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    config.validate().context("Invalid hub configuration")?;

    let credentials = StaticCredentials::from_entries(&config.credentials);
    if credentials.is_empty() {
        tracing::warn!("No credentials configured - all connections will be rejected");
    } else {
        tracing::info!("Loaded {} credentials", credentials.len());
    }

    let disabled: Vec<Identity> = config
        .credentials
        .iter()
        .filter(|entry| !entry.enabled)
        .map(|entry| Identity::new(entry.identity.clone()))
        .collect();
    let bind_addr = config.bind_address.clone();
    let health_bind = config.health_bind.clone();

    let state = Arc::new(HubState::new(config, Arc::new(credentials)));
    for identity in &disabled {
        state.directory.set_enabled(identity, false);
        tracing::info!("{} is disabled", identity);
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    if let Some(bind) = health_bind {
        let state = Arc::clone(&state);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(&bind, state, cancel).await {
                tracing::error!("Health endpoint failed: {:#}", e);
            }
        });
    }

    let server = TunnelServer::new(Arc::clone(&state), cancel);
    server.run(&bind_addr).await?;

    tracing::info!("Hub shutdown complete");
    Ok(())
}

/// Load the config file, falling back to defaults when none exists
fn load_config(path: Option<&PathBuf>) -> Result<HubConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path("hub");
    match config::load_config(&default_path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            tracing::info!("Using default configuration");
            Ok(HubConfig::default())
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
