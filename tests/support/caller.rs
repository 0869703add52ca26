// ABOUTME: SSH client playing the caller that connects through the bastion.
// ABOUTME: Public key login plus helpers to wait for specific channel messages.

use russh::client::{self, Handle, Msg};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::PublicKey;
use russh::keys::{Algorithm, PrivateKey, PrivateKeyWithHashAlg};
use russh::{Channel, ChannelMsg, Disconnect};
use jumpgate::types::Fingerprint;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(10);

pub struct CallerHandler;

impl client::Handler for CallerHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct CallerKey {
    key: Arc<PrivateKey>,
}

impl CallerKey {
    pub fn generate() -> Self {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        Self { key: Arc::new(key) }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.key.public_key())
    }
}

/// Connect to the bastion and log in as `username` with `key`.
///
/// Returns the handle and whether public key authentication succeeded.
pub async fn connect(
    bastion: SocketAddr,
    username: &str,
    key: &CallerKey,
) -> Result<(Handle<CallerHandler>, bool), russh::Error> {
    let config = Arc::new(client::Config::default());
    let mut handle = client::connect(config, bastion, CallerHandler).await?;
    let auth = handle
        .authenticate_publickey(
            username,
            PrivateKeyWithHashAlg::new(Arc::clone(&key.key), None),
        )
        .await?;
    Ok((handle, auth.success()))
}

/// Log in and panic unless it works.
pub async fn login(bastion: SocketAddr, username: &str, key: &CallerKey) -> Handle<CallerHandler> {
    let (handle, success) = connect(bastion, username, key)
        .await
        .expect("connecting to the bastion should succeed");
    assert!(success, "public key login should succeed");
    handle
}

pub async fn disconnect(handle: Handle<CallerHandler>) {
    let _ = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await;
}

/// Skip messages until one matches, returning it.
pub async fn wait_for<F>(channel: &mut Channel<Msg>, mut matches: F) -> ChannelMsg
where
    F: FnMut(&ChannelMsg) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match channel.wait().await {
                Some(msg) if matches(&msg) => return msg,
                Some(_) => continue,
                None => panic!("channel ended before the expected message"),
            }
        }
    })
    .await
    .expect("expected channel message should arrive in time")
}

/// Collect `Data` payloads until `len` bytes arrived.
pub async fn read_data(channel: &mut Channel<Msg>, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        if let ChannelMsg::Data { data } =
            wait_for(channel, |msg| matches!(msg, ChannelMsg::Data { .. })).await
        {
            received.extend_from_slice(&data);
        }
    }
    received
}

/// Poll `condition` until it holds or the wait budget runs out.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
