// ABOUTME: The bastion's client connection to a target, with host key pinning.
// ABOUTME: Authenticates with the target password, then mirrors caller channels.

use super::error::{ChannelSetupError, OutboundError};
use super::events::ChannelKind;
use crate::config::OutboundConfig;
use crate::types::{Fingerprint, Login, Target};
use russh::client::{self, Config, Handle, KeyboardInteractiveAuthResponse, Msg};
use russh::keys::ssh_key::PublicKey;
use russh::{Channel, Disconnect};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Rounds of keyboard-interactive challenges answered before giving up.
const MAX_KEYBOARD_INTERACTIVE_ROUNDS: usize = 8;

/// Client handler that accepts only the pinned host key.
pub struct PinnedHostKey {
    pinned: Fingerprint,
}

impl PinnedHostKey {
    pub fn new(pinned: Fingerprint) -> Self {
        Self { pinned }
    }
}

impl client::Handler for PinnedHostKey {
    type Error = OutboundError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let got = Fingerprint::of(server_public_key);
        if got == self.pinned {
            Ok(true)
        } else {
            Err(OutboundError::HostKeyMismatch {
                got,
                want: self.pinned.clone(),
            })
        }
    }
}

/// One answer per keyboard-interactive prompt, each the target password.
/// The copies are wiped when the answers are dropped.
pub fn keyboard_interactive_answers(
    password: &SecretString,
    prompts: usize,
) -> Zeroizing<Vec<String>> {
    Zeroizing::new(
        (0..prompts)
            .map(|_| password.expose_secret().to_string())
            .collect(),
    )
}

/// Builds outbound connections with shared client settings.
#[derive(Clone)]
pub struct Dialer {
    client_config: Arc<Config>,
}

impl Dialer {
    pub fn new(config: &OutboundConfig) -> Self {
        let client_config = Config {
            keepalive_interval: Some(config.keepalive_interval),
            keepalive_max: config.keepalive_max,
            ..Default::default()
        };
        Self {
            client_config: Arc::new(client_config),
        }
    }

    /// Connect to the login's target as the login's user.
    ///
    /// The handshake fails unless the target presents `pinned`. Password
    /// authentication is tried first, then keyboard-interactive.
    pub async fn dial(
        &self,
        login: &Login,
        password: &SecretString,
        pinned: Fingerprint,
    ) -> Result<Outbound, OutboundError> {
        let target = login.target();
        let mut handle = client::connect(
            Arc::clone(&self.client_config),
            target.as_str(),
            PinnedHostKey::new(pinned),
        )
        .await?;

        if !authenticate(&mut handle, login.user(), password).await? {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(OutboundError::AuthenticationFailed {
                user: login.user().to_string(),
            });
        }

        info!(user = login.user(), %target, "Outbound connection established");
        Ok(Outbound {
            target: target.clone(),
            handle,
        })
    }
}

async fn authenticate(
    handle: &mut Handle<PinnedHostKey>,
    user: &str,
    password: &SecretString,
) -> Result<bool, OutboundError> {
    let result = handle
        .authenticate_password(user, password.expose_secret())
        .await?;
    if result.success() {
        return Ok(true);
    }
    debug!(user, "Password rejected, trying keyboard-interactive");

    let mut response = handle
        .authenticate_keyboard_interactive_start(user, None::<String>)
        .await?;

    for _ in 0..MAX_KEYBOARD_INTERACTIVE_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                // russh owns the answers once they are handed over.
                let mut answers = keyboard_interactive_answers(password, prompts.len());
                response = handle
                    .authenticate_keyboard_interactive_respond(std::mem::take(&mut *answers))
                    .await?;
            }
        }
    }

    Ok(matches!(response, KeyboardInteractiveAuthResponse::Success))
}

/// An authenticated connection to a target.
pub struct Outbound {
    target: Target,
    handle: Handle<PinnedHostKey>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("target", &self.target)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Outbound {
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Open a channel of the same type, with the same parameters, as `kind`.
    pub async fn open(&self, kind: &ChannelKind) -> Result<Channel<Msg>, ChannelSetupError> {
        let opened = match kind {
            ChannelKind::Session => self.handle.channel_open_session().await,
            ChannelKind::DirectTcpip {
                host,
                port,
                originator_address,
                originator_port,
            } => {
                self.handle
                    .channel_open_direct_tcpip(
                        host.as_str(),
                        *port,
                        originator_address.as_str(),
                        *originator_port,
                    )
                    .await
            }
            ChannelKind::DirectStreamlocal { socket_path } => {
                self.handle
                    .channel_open_direct_streamlocal(socket_path.as_str())
                    .await
            }
        };

        opened.map_err(|source| ChannelSetupError::OpenFailed {
            kind: kind.name(),
            source,
        })
    }

    pub async fn disconnect(self) -> Result<(), OutboundError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}
