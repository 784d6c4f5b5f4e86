//! Bearer credential validation
//!
//! Tokens are kept only as SHA-256 digests; a presented credential is hashed
//! and looked up, so the table never holds plaintext secrets after load.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use kb_core::config::CredentialEntry;
use kb_core::Identity;

/// Maps a presented credential to the identity it authenticates
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// The identity for `credential`, or `None` if it is not recognised
    async fn validate(&self, credential: &str) -> Option<Identity>;
}

type TokenDigest = [u8; 32];

fn digest(token: &str) -> TokenDigest {
    Sha256::digest(token.as_bytes()).into()
}

/// Fixed token table loaded from the hub configuration
#[derive(Debug, Default)]
pub struct StaticCredentials {
    tokens: HashMap<TokenDigest, Identity>,
}

impl StaticCredentials {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from configured entries.
    ///
    /// Disabled entries are still recognised here; refusing them is the
    /// session directory's job so that an administrator can re-enable an
    /// identity without reissuing its token.
    pub fn from_entries(entries: &[CredentialEntry]) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.insert(&entry.token, Identity::new(entry.identity.clone()));
        }
        store
    }

    /// Add or replace a token
    pub fn insert(&mut self, token: &str, identity: Identity) {
        if let Some(previous) = self.tokens.insert(digest(token), identity.clone()) {
            tracing::warn!("Token for {} reassigned to {}", previous, identity);
        }
    }

    /// Number of known tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl CredentialValidator for StaticCredentials {
    async fn validate(&self, credential: &str) -> Option<Identity> {
        self.tokens.get(&digest(credential)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(identity: &str, token: &str, enabled: bool) -> CredentialEntry {
        CredentialEntry {
            identity: identity.to_string(),
            token: token.to_string(),
            enabled,
        }
    }

    #[tokio::test]
    async fn test_known_token_maps_to_identity() {
        let store = StaticCredentials::from_entries(&[
            entry("K-001", "alpha", true),
            entry("K-002", "beta", false),
        ]);
        assert_eq!(store.len(), 2);

        assert_eq!(store.validate("alpha").await, Some(Identity::from("K-001")));
        assert_eq!(store.validate("beta").await, Some(Identity::from("K-002")));
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let store = StaticCredentials::from_entries(&[entry("K-001", "alpha", true)]);
        assert_eq!(store.validate("alpha ").await, None);
        assert_eq!(store.validate("").await, None);
    }

    #[test]
    fn test_table_holds_no_plaintext() {
        let store = StaticCredentials::from_entries(&[entry("K-001", "alpha", true)]);
        assert!(!format!("{:?}", store).contains("alpha"));
    }
}
