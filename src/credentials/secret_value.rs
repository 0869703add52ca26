// ABOUTME: Secret values in the credentials file, literal or taken from the environment.
// ABOUTME: Resolved once at load time into zeroize-on-drop strings.

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl SecretValue {
    pub fn resolve(&self) -> Result<SecretString> {
        match self {
            SecretValue::Literal(s) => Ok(SecretString::from(s.clone())),
            SecretValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(SecretString::from(val)),
                Err(_) => default
                    .clone()
                    .map(SecretString::from)
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }
}

// Literals never reach logs.
impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Literal(_) => f.write_str("Literal(<redacted>)"),
            SecretValue::FromEnv { var, .. } => f.debug_struct("FromEnv").field("var", var).finish(),
        }
    }
}
