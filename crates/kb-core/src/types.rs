//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a remote machine (the kiosk id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    /// Create a new identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of an agent's tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Waiting out a backoff delay
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, credential sent
    Authenticating,
    /// Credential accepted, calls flowing
    Online,
    /// Stopped for good
    Shutdown,
}

impl ConnectionState {
    /// Whether calls can flow
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionState::Online)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Online => write!(f, "online"),
            ConnectionState::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_conversions() {
        let a = Identity::from("K-001");
        let b = Identity::new(String::from("K-001"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "K-001");
        assert_eq!(format!("{}", a), "K-001");
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Online), "online");
        assert_eq!(
            format!("{}", ConnectionState::Authenticating),
            "authenticating"
        );
        assert!(ConnectionState::Online.is_online());
        assert!(!ConnectionState::Connecting.is_online());
    }

    #[test]
    fn test_connection_state_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionState::Disconnected).unwrap();
        assert_eq!(json, r#""disconnected""#);
    }
}
