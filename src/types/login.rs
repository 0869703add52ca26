// ABOUTME: Inbound login names of the form <user>%<target>.
// ABOUTME: Splits the SSH username into the outbound user and the dial target.

use std::fmt;
use thiserror::Error;

/// Separates the outbound user from the target in an inbound username.
pub const DELIMITER: char = '%';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("username must have the form <user>%<target>")]
    MissingDelimiter,

    #[error("username has an empty user part")]
    EmptyUser,

    #[error("username has an empty target part")]
    EmptyTarget,
}

/// Dial address of a target host, `host:port`.
///
/// Used verbatim as the credential store key and as the outbound address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target(String);

impl Target {
    pub fn new(value: &str) -> Result<Self, LoginError> {
        if value.is_empty() {
            return Err(LoginError::EmptyTarget);
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parsed inbound username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    user: String,
    target: Target,
}

impl Login {
    /// Split `username` at the first delimiter.
    ///
    /// Everything after the first `%` belongs to the target, so a target may
    /// itself contain the delimiter.
    pub fn parse(username: &str) -> Result<Self, LoginError> {
        let (user, target) = username
            .split_once(DELIMITER)
            .ok_or(LoginError::MissingDelimiter)?;

        if user.is_empty() {
            return Err(LoginError::EmptyUser);
        }

        Ok(Self {
            user: user.to_string(),
            target: Target::new(target)?,
        })
    }

    /// Username presented to the target.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.user, DELIMITER, self.target)
    }
}
