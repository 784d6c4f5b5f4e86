//! HTTP routing of tunnelled calls to local services
//!
//! Each call names an operation. The [`RoutingTable`] maps it to a local
//! endpoint with a timeout and a verb policy, and [`HttpRouter`] performs the
//! request with `reqwest`. Every failure is folded into a `status=error`
//! [`Reply`] whose body is `{"error": <kind>, "message": <text>}`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Url};
use thiserror::Error;

use kb_core::config::{AgentConfig, RouteConfig};
use kb_core::error::ConfigError;
use kb_core::LocalRouter;
use kb_protocol::{CallEnvelope, Method, Reply};

/// Why a call could not be answered by its local service
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("No route for operation {0:?}")]
    NotFound(String),

    #[error("Method {method} not allowed for operation {operation:?}")]
    MethodNotAllowed { operation: String, method: Method },

    #[error("Invalid body: {0}")]
    InvalidBody(String),

    #[error("Local service timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cannot connect to local service: {0}")]
    ConnectionRefused(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

impl RouteError {
    /// Machine-readable kind carried in the error body
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::NotFound(_) => "route_not_found",
            RouteError::MethodNotAllowed { .. } => "method_not_allowed",
            RouteError::InvalidBody(_) => "invalid_body",
            RouteError::Timeout(_) => "timeout",
            RouteError::ConnectionRefused(_) => "connection_refused",
            RouteError::Http { .. } => "http_error",
            RouteError::Other(_) => "other",
        }
    }

    /// Error reply for this failure
    pub fn into_reply(self) -> Reply {
        error_reply(self.kind(), &self.to_string())
    }
}

/// Build a `status=error` reply with the standard JSON body
pub fn error_reply(kind: &str, message: &str) -> Reply {
    let body = serde_json::json!({ "error": kind, "message": message });
    Reply::error(body.to_string())
}

/// A validated route
#[derive(Debug, Clone)]
pub struct Route {
    pub url: Url,
    pub timeout: Duration,
    pub methods: Vec<Method>,
}

impl Route {
    fn from_config(name: &str, config: &RouteConfig) -> Result<Self, ConfigError> {
        let url = Url::parse(&config.url)
            .map_err(|e| ConfigError::Invalid(format!("route {}: {}", name, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "route {}: unsupported scheme {}",
                name,
                url.scheme()
            )));
        }
        if config.timeout.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "route {}: timeout must be non-zero",
                name
            )));
        }

        Ok(Self {
            url,
            timeout: config.timeout,
            methods: config.methods.clone(),
        })
    }

    fn allows(&self, method: Method) -> bool {
        self.methods.is_empty() || self.methods.contains(&method)
    }
}

/// Operation name to local endpoint
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<String, Route>,
    default: Option<Route>,
}

impl RoutingTable {
    /// Build and validate the table from agent configuration
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        let routes = config
            .routes
            .iter()
            .map(|(name, route)| Ok((name.clone(), Route::from_config(name, route)?)))
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;

        let default = config
            .default_route
            .as_ref()
            .map(|route| Route::from_config("default_route", route))
            .transpose()?;

        Ok(Self { routes, default })
    }

    /// Route for an operation: exact match, then the default route
    pub fn lookup(&self, operation: &str) -> Result<&Route, RouteError> {
        self.routes
            .get(operation)
            .or(self.default.as_ref())
            .ok_or_else(|| RouteError::NotFound(operation.to_string()))
    }

    /// Route for a call, with the verb policy applied
    pub fn resolve(&self, operation: &str, method: Method) -> Result<&Route, RouteError> {
        let route = self.lookup(operation)?;
        if !route.allows(method) {
            return Err(RouteError::MethodNotAllowed {
                operation: operation.to_string(),
                method,
            });
        }
        Ok(route)
    }

    /// Number of routes, counting the default
    pub fn len(&self) -> usize {
        self.routes.len() + usize::from(self.default.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `LocalRouter` that forwards calls over HTTP
pub struct HttpRouter {
    table: RoutingTable,
    client: Client,
}

impl HttpRouter {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table,
            client: Client::new(),
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Build the HTTP request for a call without sending it
    pub fn build_request(
        &self,
        call: &CallEnvelope,
        timeout: Duration,
    ) -> Result<reqwest::Request, RouteError> {
        let route = self.table.resolve(&call.operation, call.method)?;

        let mut url = route.url.clone();
        if call.method.is_read_style() {
            append_query(&mut url, &call.body)?;
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &call.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), _) if is_connection_header(&name) => {
                    tracing::debug!("Dropping connection header {:?}", name);
                }
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::debug!("Skipping unrepresentable header {:?}", name),
            }
        }
        if !call.method.is_read_style() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut builder = self
            .client
            .request(to_http_method(call.method), url)
            .timeout(timeout)
            .headers(headers);

        if !call.method.is_read_style() {
            builder = builder.body(call.body.clone());
        }

        builder
            .build()
            .map_err(|e| RouteError::Other(e.to_string()))
    }

    async fn execute(&self, call: &CallEnvelope, timeout: Duration) -> Result<Bytes, RouteError> {
        let request = self.build_request(call, timeout)?;
        tracing::debug!(
            "Routing {} {} to {}",
            call.method,
            call.operation,
            request.url()
        );

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(RouteError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
    }
}

#[async_trait]
impl LocalRouter for HttpRouter {
    async fn invoke(&self, call: &CallEnvelope, timeout: Duration) -> Reply {
        match self.execute(call, timeout).await {
            Ok(body) => Reply::ok(body),
            Err(e) => {
                tracing::warn!("Call {} ({}) failed: {}", call.call_id, call.operation, e);
                e.into_reply()
            }
        }
    }

    fn timeout_for(&self, operation: &str) -> Option<Duration> {
        self.table.lookup(operation).ok().map(|route| route.timeout)
    }

    fn route_count(&self) -> usize {
        self.table.len()
    }
}

/// Headers describing the hub-side hop or the framing of the original
/// request. The local request gets its own from `reqwest`.
const CONNECTION_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

fn is_connection_header(name: &HeaderName) -> bool {
    // HeaderName is always lowercase
    CONNECTION_HEADERS.contains(&name.as_str())
}

fn to_http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Turn a JSON object body into query parameters
fn append_query(url: &mut Url, body: &[u8]) -> Result<(), RouteError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }

    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| RouteError::InvalidBody(e.to_string()))?;
    let object = value.as_object().ok_or_else(|| {
        RouteError::InvalidBody("GET body must be a JSON object".to_string())
    })?;

    let mut pairs = url.query_pairs_mut();
    for (key, value) in object {
        match value {
            serde_json::Value::String(s) => pairs.append_pair(key, s),
            serde_json::Value::Null => pairs.append_pair(key, ""),
            other => pairs.append_pair(key, &other.to_string()),
        };
    }
    Ok(())
}

fn classify(error: reqwest::Error, timeout: Duration) -> RouteError {
    if error.is_timeout() {
        RouteError::Timeout(timeout)
    } else if error.is_connect() {
        RouteError::ConnectionRefused(error.to_string())
    } else {
        RouteError::Other(error.to_string())
    }
}
