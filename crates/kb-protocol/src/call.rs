//! Call and result envelopes
//!
//! A [`CallEnvelope`] travels hub → agent and is answered by exactly one
//! [`ResultEnvelope`] carrying the same [`CallId`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Header map carried by a call. Ordered so encoding is deterministic.
pub type Headers = BTreeMap<String, String>;

/// Unique identifier correlating a call with its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a fresh random call ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request verb for the local service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Read-style verbs carry their body as query parameters
    pub fn is_read_style(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unsupported verb
#[derive(Debug, Error)]
#[error("Unsupported method: {0}")]
pub struct ParseMethodError(String);

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

/// Outcome status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// A call issued by the hub for a remote agent to execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Correlation token, echoed by the result
    pub call_id: CallId,
    /// Operation selector, resolved by the agent's routing table
    pub operation: String,
    /// Verb for the local service
    pub method: Method,
    /// Headers forwarded to the local service
    pub headers: Headers,
    /// Opaque request body
    pub body: Bytes,
}

impl CallEnvelope {
    /// Create a new call envelope
    pub fn new(
        call_id: CallId,
        operation: impl Into<String>,
        method: Method,
        headers: Headers,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            call_id,
            operation: operation.into(),
            method,
            headers,
            body: body.into(),
        }
    }
}

/// The answer to exactly one [`CallEnvelope`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Call ID of the originating call
    pub call_id: CallId,
    /// Outcome
    pub status: Status,
    /// Opaque response body
    pub body: Bytes,
}

impl ResultEnvelope {
    /// Build a result from a reply
    pub fn new(call_id: CallId, reply: Reply) -> Self {
        Self {
            call_id,
            status: reply.status,
            body: reply.body,
        }
    }

    /// Successful result
    pub fn ok(call_id: CallId, body: impl Into<Bytes>) -> Self {
        Self::new(call_id, Reply::ok(body))
    }

    /// Failed result
    pub fn error(call_id: CallId, body: impl Into<Bytes>) -> Self {
        Self::new(call_id, Reply::error(body))
    }

    /// Drop the correlation token
    pub fn into_reply(self) -> Reply {
        Reply {
            status: self.status,
            body: self.body,
        }
    }
}

/// Downstream `{status, body}` pair, without correlation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub status: Status,
    pub body: Bytes,
}

impl Reply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: Status::Ok,
            body: body.into(),
        }
    }

    pub fn error(body: impl Into<Bytes>) -> Self {
        Self {
            status: Status::Error,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}
