// ABOUTME: Credential store interface queried while mediating a connection.
// ABOUTME: Target passwords, pinned host keys and the (key, target) access list.

mod file_store;
mod secret_value;

pub use file_store::{AclEntry, FileStore};
pub use secret_value::SecretValue;

use crate::types::{Fingerprint, Target};
use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no {record} recorded for {key}")]
    NotFound { record: &'static str, key: String },

    #[error("credential backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Read-only lookups backing authentication, access control and pinning.
///
/// Implementations are shared by every connection and must tolerate
/// concurrent calls.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Password the bastion presents to `target`.
    async fn password_for(&self, target: &Target) -> Result<SecretString, StoreError>;

    /// Expected host key fingerprint of `target`.
    async fn pinned_host_key(&self, target: &Target) -> Result<Fingerprint, StoreError>;

    /// Whether the caller holding `key` may reach `target`.
    async fn is_authorized(&self, key: &Fingerprint, target: &Target)
    -> Result<bool, StoreError>;
}
