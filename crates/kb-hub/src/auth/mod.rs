//! Credential validation for incoming tunnels

mod credentials;

pub use credentials::{CredentialValidator, StaticCredentials};
