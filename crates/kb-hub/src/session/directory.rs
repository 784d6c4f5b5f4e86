//! Session directory
//!
//! One [`Session`] per identity, created on its first successful handshake
//! and kept across disconnects. Every operation runs under the identity's
//! `DashMap` entry lock, so attach, detach and enable changes for the same
//! identity are serialized.

use dashmap::DashMap;
use serde::Serialize;

use kb_core::time::current_time_millis;
use kb_core::{CallError, Identity};

use super::handle::{ConnectionId, SessionHandle};

/// Directory record for one identity
#[derive(Debug)]
pub struct Session {
    pub identity: Identity,
    /// Present iff the identity is online
    pub handle: Option<SessionHandle>,
    pub enabled: bool,
    /// Unix millis of the last attach or inbound frame
    pub last_seen: u64,
}

impl Session {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            handle: None,
            enabled: true,
            last_seen: current_time_millis(),
        }
    }
}

/// Serializable summary of a [`Session`]
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub identity: Identity,
    pub online: bool,
    pub enabled: bool,
    pub last_seen: u64,
    pub connection_id: Option<ConnectionId>,
    pub pending_calls: usize,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            identity: session.identity.clone(),
            online: session.handle.is_some(),
            enabled: session.enabled,
            last_seen: session.last_seen,
            connection_id: session.handle.as_ref().map(SessionHandle::connection_id),
            pending_calls: session
                .handle
                .as_ref()
                .map(|h| h.registry().len())
                .unwrap_or(0),
        }
    }
}

/// Identity to live channel mapping
pub struct SessionDirectory {
    sessions: DashMap<Identity, Session>,
    allow_duplicates: bool,
}

impl SessionDirectory {
    /// Create an empty directory.
    ///
    /// With `allow_duplicates` a reconnecting identity's previous channel is
    /// left open; the newest channel is still the one calls go to.
    pub fn new(allow_duplicates: bool) -> Self {
        Self {
            sessions: DashMap::new(),
            allow_duplicates,
        }
    }

    /// Make `handle` the identity's authoritative channel.
    ///
    /// Returns the handle it replaced, which has already been closed unless
    /// duplicates are allowed. A disabled identity is refused and `handle`
    /// is closed, so a disable that lands between handshake and attach still
    /// wins.
    pub fn attach(
        &self,
        identity: &Identity,
        handle: SessionHandle,
    ) -> Result<Option<SessionHandle>, CallError> {
        let mut session = self
            .sessions
            .entry(identity.clone())
            .or_insert_with(|| Session::new(identity.clone()));

        if !session.enabled {
            tracing::info!(
                "Refusing {} for disabled identity {}",
                handle.connection_id(),
                identity
            );
            handle.close();
            return Err(CallError::Disabled(identity.clone()));
        }

        session.last_seen = current_time_millis();
        let previous = session.handle.replace(handle);

        if let Some(old) = &previous {
            if self.allow_duplicates {
                tracing::info!(
                    "{} reconnected on a second channel, {} left open",
                    identity,
                    old.connection_id()
                );
            } else {
                tracing::info!(
                    "{} reconnected, closing previous channel {}",
                    identity,
                    old.connection_id()
                );
                old.close();
            }
        }

        Ok(previous)
    }

    /// Clear the identity's channel if it is still `handle`.
    ///
    /// A detach from a channel that has since been replaced is a no-op.
    pub fn detach(&self, identity: &Identity, handle: &SessionHandle) -> bool {
        let Some(mut session) = self.sessions.get_mut(identity) else {
            return false;
        };

        if session.handle.as_ref() != Some(handle) {
            tracing::debug!(
                "Ignoring stale detach of {} for {}",
                handle.connection_id(),
                identity
            );
            return false;
        }

        session.handle = None;
        session.last_seen = current_time_millis();
        true
    }

    /// The identity's live channel
    pub fn lookup(&self, identity: &Identity) -> Result<SessionHandle, CallError> {
        let session = self
            .sessions
            .get(identity)
            .ok_or_else(|| CallError::NotConnected(identity.clone()))?;

        if !session.enabled {
            return Err(CallError::Disabled(identity.clone()));
        }

        session
            .handle
            .clone()
            .ok_or_else(|| CallError::NotConnected(identity.clone()))
    }

    /// Enable or disable an identity.
    ///
    /// Disabling closes and detaches any live channel. Unknown identities get
    /// a record so they can be refused before their first handshake.
    pub fn set_enabled(&self, identity: &Identity, enabled: bool) {
        let mut session = self
            .sessions
            .entry(identity.clone())
            .or_insert_with(|| Session::new(identity.clone()));

        session.enabled = enabled;
        if !enabled {
            if let Some(handle) = session.handle.take() {
                tracing::info!("{} disabled, closing {}", identity, handle.connection_id());
                handle.close();
            }
        }
    }

    /// Whether the identity may connect; unknown identities may
    pub fn is_enabled(&self, identity: &Identity) -> bool {
        self.sessions
            .get(identity)
            .map(|session| session.enabled)
            .unwrap_or(true)
    }

    /// Record activity from the identity
    pub fn touch(&self, identity: &Identity) {
        if let Some(mut session) = self.sessions.get_mut(identity) {
            session.last_seen = current_time_millis();
        }
    }

    /// Delete the identity's record, closing any live channel
    pub fn remove(&self, identity: &Identity) -> bool {
        match self.sessions.remove(identity) {
            Some((_, session)) => {
                if let Some(handle) = session.handle {
                    handle.close();
                }
                true
            }
            None => false,
        }
    }

    /// Summaries of every known identity, sorted by identity
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo::from(entry.value()))
            .collect();
        sessions.sort_by(|a, b| a.identity.cmp(&b.identity));
        sessions
    }

    /// Number of known identities
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of identities with a live channel
    pub fn online_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.handle.is_some())
            .count()
    }
}
