// ABOUTME: Credential store backed by a YAML credentials file.
// ABOUTME: Loaded once at startup and served from memory.

use super::{CredentialStore, SecretValue, StoreError};
use crate::error::{Error, Result};
use crate::types::{Fingerprint, Target};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// One row of the access list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct AclEntry {
    pub key: Fingerprint,
    pub target: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialsFile {
    #[serde(default)]
    passwords: HashMap<String, SecretValue>,

    #[serde(default)]
    host_keys: HashMap<String, Fingerprint>,

    #[serde(default)]
    acl: Vec<AclEntry>,
}

/// In-memory credential tables.
///
/// ```yaml
/// passwords:
///   db.internal:22: { env: DB_SSH_PASSWORD }
/// host_keys:
///   db.internal:22: "SHA256:..."
/// acl:
///   - key: "SHA256:..."
///     target: db.internal:22
/// ```
#[derive(Debug, Default)]
pub struct FileStore {
    passwords: HashMap<String, SecretString>,
    host_keys: HashMap<String, Fingerprint>,
    acl: HashSet<AclEntry>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, target: &str, password: impl Into<String>) -> Self {
        self.passwords
            .insert(target.to_string(), SecretString::from(password.into()));
        self
    }

    pub fn with_host_key(mut self, target: &str, fingerprint: Fingerprint) -> Self {
        self.host_keys.insert(target.to_string(), fingerprint);
        self
    }

    pub fn allow(mut self, key: Fingerprint, target: &str) -> Self {
        self.acl.insert(AclEntry {
            key,
            target: target.to_string(),
        });
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: CredentialsFile = serde_yaml::from_str(yaml)?;

        for target in file.host_keys.keys().chain(file.passwords.keys()) {
            Target::new(target).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        }

        let passwords = file
            .passwords
            .iter()
            .map(|(target, value)| value.resolve().map(|secret| (target.clone(), secret)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            passwords,
            host_keys: file.host_keys,
            acl: file.acl.into_iter().collect(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Number of targets with a stored password.
    pub fn target_count(&self) -> usize {
        self.passwords.len()
    }

    pub fn acl_len(&self) -> usize {
        self.acl.len()
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn password_for(&self, target: &Target) -> std::result::Result<SecretString, StoreError> {
        self.passwords
            .get(target.as_str())
            .map(|secret| SecretString::from(secret.expose_secret().to_owned()))
            .ok_or_else(|| StoreError::NotFound {
                record: "password",
                key: target.to_string(),
            })
    }

    async fn pinned_host_key(
        &self,
        target: &Target,
    ) -> std::result::Result<Fingerprint, StoreError> {
        self.host_keys
            .get(target.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                record: "host key",
                key: target.to_string(),
            })
    }

    /// A target with no access list rows at all reports `NotFound`; a known
    /// target that lacks this key reports `false`.
    async fn is_authorized(
        &self,
        key: &Fingerprint,
        target: &Target,
    ) -> std::result::Result<bool, StoreError> {
        let mut rows = self
            .acl
            .iter()
            .filter(|entry| entry.target == target.as_str())
            .peekable();

        if rows.peek().is_none() {
            return Err(StoreError::NotFound {
                record: "acl entry",
                key: target.to_string(),
            });
        }

        Ok(rows.any(|entry| &entry.key == key))
    }
}
