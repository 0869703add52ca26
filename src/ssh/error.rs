// ABOUTME: Error types for mediated connections, channel setup and relays.
// ABOUTME: ConnectionError uses SNAFU with a kind for programmatic handling.

use crate::credentials::StoreError;
use crate::types::{Fingerprint, LoginError, Target};
use snafu::Snafu;
use thiserror::Error;

/// Fatal failure of one mediated connection. Never retried.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConnectionError {
    #[snafu(display("malformed username {username:?}: {source}"))]
    AuthFormat {
        username: String,
        source: LoginError,
    },

    #[snafu(display("credential lookup for {target} failed: {source}"))]
    CredentialLookup { target: Target, source: StoreError },

    #[snafu(display("acl rejects key {fingerprint} for {target}"))]
    AccessDenied {
        fingerprint: Fingerprint,
        target: Target,
    },

    #[snafu(display("wrong host key for {target}: got {got}, want {want}"))]
    HostKeyMismatch {
        target: Target,
        got: Fingerprint,
        want: Fingerprint,
    },

    #[snafu(display("dialing {target} failed: {source}"))]
    Dial {
        target: Target,
        source: OutboundError,
    },

    #[snafu(display("inbound handshake failed: {reason}"))]
    Handshake { reason: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Inbound username is not `<user>%<target>`.
    AuthFormat,
    /// The credential store could not answer.
    CredentialLookup,
    /// The caller's key is not allowed to reach the target.
    AccessDenied,
    /// The target presented a key other than the pinned one.
    HostKeyMismatch,
    /// The outbound connection could not be established or authenticated.
    Dial,
    /// The inbound SSH handshake did not complete.
    Handshake,
}

impl ConnectionError {
    pub fn kind(&self) -> ConnectionErrorKind {
        match self {
            ConnectionError::AuthFormat { .. } => ConnectionErrorKind::AuthFormat,
            ConnectionError::CredentialLookup { .. } => ConnectionErrorKind::CredentialLookup,
            ConnectionError::AccessDenied { .. } => ConnectionErrorKind::AccessDenied,
            ConnectionError::HostKeyMismatch { .. } => ConnectionErrorKind::HostKeyMismatch,
            ConnectionError::Dial { .. } => ConnectionErrorKind::Dial,
            ConnectionError::Handshake { .. } => ConnectionErrorKind::Handshake,
        }
    }

    pub(crate) fn dial(target: &Target, source: OutboundError) -> Self {
        match source {
            OutboundError::HostKeyMismatch { got, want } => ConnectionError::HostKeyMismatch {
                target: target.clone(),
                got,
                want,
            },
            source => ConnectionError::Dial {
                target: target.clone(),
                source,
            },
        }
    }
}

/// Failure of the bastion's client connection to a target.
#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("wrong host key: got {got}, want {want}")]
    HostKeyMismatch { got: Fingerprint, want: Fingerprint },

    #[error("target rejected password and keyboard-interactive login for {user}")]
    AuthenticationFailed { user: String },

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

/// An inbound channel that could not be mirrored to the target.
/// The caller's channel is closed and the connection carries on.
#[derive(Debug, Error)]
pub enum ChannelSetupError {
    #[error("target refused {kind} channel: {source}")]
    OpenFailed {
        kind: &'static str,
        #[source]
        source: russh::Error,
    },
}

/// Ends a single channel relay; siblings are unaffected.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("outbound channel failed: {0}")]
    Outbound(#[from] russh::Error),

    #[error("inbound session is gone")]
    InboundGone,
}
