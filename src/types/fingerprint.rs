// ABOUTME: SHA256 public key fingerprints in OpenSSH text form.
// ABOUTME: Used for ACL entries and host key pinning, compared as plain strings.

use russh::keys::ssh_key::{HashAlg, PublicKey};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    #[error("fingerprint must start with \"SHA256:\"")]
    MissingPrefix,

    #[error("fingerprint has an empty digest")]
    EmptyDigest,

    #[error("invalid character in fingerprint: '{0}'")]
    InvalidChar(char),
}

/// `SHA256:<base64 without padding>`, as printed by `ssh-keygen -l`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const PREFIX: &'static str = "SHA256:";

    /// Compute the fingerprint of a public key.
    pub fn of(key: &PublicKey) -> Self {
        Self(key.fingerprint(HashAlg::Sha256).to_string())
    }

    pub fn parse(value: &str) -> Result<Self, FingerprintError> {
        let digest = value
            .strip_prefix(Self::PREFIX)
            .ok_or(FingerprintError::MissingPrefix)?;

        if digest.is_empty() {
            return Err(FingerprintError::EmptyDigest);
        }

        if let Some(c) = digest
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '+' && *c != '/')
        {
            return Err(FingerprintError::InvalidChar(c));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = FingerprintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
