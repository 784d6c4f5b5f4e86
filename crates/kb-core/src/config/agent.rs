//! Agent configuration

use kb_protocol::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the kiosk agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hub tunnel address (`host:port`)
    pub hub_address: String,

    /// Bearer credential presented in the handshake
    pub credential: String,

    /// Timeout for opening the transport
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Timeout for the hub's handshake acknowledgment
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Tear the channel down if nothing arrives for this long
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,

    /// Results buffered while the channel is down
    pub offline_queue_capacity: usize,

    /// Slack added to a route's timeout before a running call is expired
    #[serde(with = "duration_secs")]
    pub call_grace: Duration,

    /// Local address for the health endpoint, `None` disables it
    pub health_bind: Option<String>,

    /// Routes by operation name
    pub routes: BTreeMap<String, RouteConfig>,

    /// Fallback for operations without an explicit route
    pub default_route: Option<RouteConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hub_address: "localhost:8765".to_string(),
            credential: String::new(),
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(90),
            backoff: BackoffConfig::default(),
            offline_queue_capacity: 10,
            call_grace: Duration::from_secs(5),
            health_bind: Some("127.0.0.1:9091".to_string()),
            routes: BTreeMap::new(),
            default_route: None,
        }
    }
}

impl AgentConfig {
    /// Check the configuration for values the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub_address.trim().is_empty() {
            return Err(ConfigError::MissingField("hub_address".to_string()));
        }
        if self.credential.is_empty() {
            return Err(ConfigError::MissingField("credential".to_string()));
        }
        if self.offline_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "offline_queue_capacity must be at least 1".to_string(),
            ));
        }
        self.backoff.validate()?;

        for (operation, route) in &self.routes {
            route.validate(operation)?;
        }
        if let Some(route) = &self.default_route {
            route.validate("default_route")?;
        }

        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial.is_zero() || self.initial > self.max {
            return Err(ConfigError::Invalid(
                "backoff.initial must be non-zero and not above backoff.max".to_string(),
            ));
        }
        if !(self.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "backoff.multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(
                "backoff.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A local service an operation is routed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Base URL of the local service
    pub url: String,

    /// Per-call timeout
    #[serde(with = "duration_secs", default = "default_route_timeout")]
    pub timeout: Duration,

    /// Allowed verbs; empty allows all
    #[serde(default)]
    pub methods: Vec<Method>,
}

fn default_route_timeout() -> Duration {
    Duration::from_secs(30)
}

impl RouteConfig {
    /// Route with no verb restriction and the default timeout
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: default_route_timeout(),
            methods: Vec::new(),
        }
    }

    /// Whether `method` passes this route's verb policy
    pub fn allows(&self, method: Method) -> bool {
        self.methods.is_empty() || self.methods.contains(&method)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "route {}: url must be http:// or https://, got {:?}",
                name, self.url
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "route {}: timeout must be non-zero",
                name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AgentConfig {
        AgentConfig {
            credential: "token".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.offline_queue_capacity, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.backoff.initial, Duration::from_secs(1));
        assert_eq!(config.backoff.max, Duration::from_secs(60));
        assert_eq!(config.health_bind.as_deref(), Some("127.0.0.1:9091"));
    }

    #[test]
    fn test_parse_routes() {
        let toml = r#"
            hub_address = "hub.example.com:8765"
            credential = "abc"

            [routes.payment]
            url = "http://127.0.0.1:8000/pay"
            timeout = 45
            methods = ["POST"]

            [routes.status]
            url = "http://127.0.0.1:8000/status"

            [default_route]
            url = "http://127.0.0.1:8000"
            timeout = 0.5
        "#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        let payment = &config.routes["payment"];
        assert_eq!(payment.timeout, Duration::from_secs(45));
        assert!(payment.allows(Method::Post));
        assert!(!payment.allows(Method::Get));

        let status = &config.routes["status"];
        assert_eq!(status.timeout, Duration::from_secs(30));
        assert!(status.allows(Method::Delete));

        let fallback = config.default_route.unwrap();
        assert_eq!(fallback.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_credential() {
        let config = AgentConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "credential"
        ));
    }

    #[test]
    fn test_invalid_route_url() {
        let mut config = valid_config();
        config
            .routes
            .insert("payment".to_string(), RouteConfig::new("ftp://nowhere"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_backoff() {
        let mut config = valid_config();
        config.backoff.jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.backoff.initial = Duration::from_secs(120);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_queue_capacity() {
        let mut config = valid_config();
        config.offline_queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
