//! Hub configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the hub daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the tunnel listener binds to
    pub bind_address: String,

    /// Address for the health endpoint, `None` disables it
    pub health_bind: Option<String>,

    /// How long a new connection has to send its `Hello`
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Heartbeat interval
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Silence after which a channel is considered dead
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// How often each channel's registry is swept for expired calls
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,

    /// Timeout for calls that do not carry their own
    #[serde(with = "duration_secs")]
    pub default_call_timeout: Duration,

    /// Keep an identity's previous channel open when it reconnects
    pub allow_duplicates: bool,

    /// Outbound frames buffered per channel
    pub outbound_buffer: usize,

    /// Accepted credentials
    pub credentials: Vec<CredentialEntry>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8765".to_string(),
            health_bind: Some("127.0.0.1:9090".to_string()),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(1),
            default_call_timeout: Duration::from_secs(45),
            allow_duplicates: false,
            outbound_buffer: 256,
            credentials: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Check the configuration for values the hub cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::MissingField("bind_address".to_string()));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid(
                "outbound_buffer must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweep_interval and heartbeat_interval must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout must exceed heartbeat_interval".to_string(),
            ));
        }

        let mut tokens = HashSet::new();
        for entry in &self.credentials {
            if entry.identity.is_empty() || entry.token.is_empty() {
                return Err(ConfigError::Invalid(
                    "credential entries need an identity and a token".to_string(),
                ));
            }
            if !tokens.insert(entry.token.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "token for {} is already assigned to another identity",
                    entry.identity
                )));
            }
        }

        Ok(())
    }
}

/// A bearer token issued to one kiosk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    /// Identity the token authenticates as
    pub identity: String,

    /// The bearer token
    pub token: String,

    /// Disabled identities are refused at handshake
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
