//! Configuration management for kiosk-bridge

mod agent;
mod hub;
pub mod serde_utils;

pub use agent::{AgentConfig, BackoffConfig, RouteConfig};
pub use hub::{CredentialEntry, HubConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kiosk-bridge")
}

/// Get the default configuration file path for a component ("agent", "hub")
pub fn default_config_path(component: &str) -> PathBuf {
    default_config_dir().join(format!("{}.toml", component))
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let result: Result<HubConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(p)) if p == path));
    }

    #[test]
    fn test_save_then_load_hub_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hub.toml");

        let mut config = HubConfig::default();
        config.allow_duplicates = true;
        config.credentials.push(CredentialEntry {
            identity: "K-001".to_string(),
            token: "secret".to_string(),
            enabled: true,
        });
        save_config(&path, &config).unwrap();

        let loaded: HubConfig = load_config(&path).unwrap();
        assert!(loaded.allow_duplicates);
        assert_eq!(loaded.credentials.len(), 1);
        assert_eq!(loaded.credentials[0].identity, "K-001");
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "hub_address = [").unwrap();

        let result: Result<AgentConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_default_config_path_names_component() {
        let path = default_config_path("agent");
        assert!(path.ends_with("kiosk-bridge/agent.toml"));
    }
}
