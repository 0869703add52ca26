// ABOUTME: TCP listener that hands each accepted connection to a supervisor.
// ABOUTME: Also loads or generates the bastion host key and builds the russh server config.

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::ssh::{Dialer, Supervisor, inbound_methods};
use russh::keys::ssh_key::LineEnding;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, PrivateKey, load_secret_key};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{Instrument, info, info_span, warn};

/// Load the host key at `path`, creating an Ed25519 key there if missing.
pub fn load_or_generate_host_key(path: &Path) -> Result<PrivateKey> {
    if path.exists() {
        return load_secret_key(path, None).map_err(|e| Error::HostKey {
            path: path.to_path_buf(),
            reason: e.to_string(),
        });
    }

    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(|e| Error::HostKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let pem = key.to_openssh(LineEnding::LF).map_err(|e| Error::HostKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pem.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!(path = %path.display(), "Generated new host key");
    Ok(key)
}

/// russh server settings for callers: public key only.
pub fn server_config(config: &Config, host_key: PrivateKey) -> russh::server::Config {
    russh::server::Config {
        keys: vec![host_key],
        methods: inbound_methods(),
        auth_rejection_time: config.auth_rejection_time,
        auth_rejection_time_initial: Some(Duration::ZERO),
        inactivity_timeout: Some(config.inactivity_timeout),
        ..Default::default()
    }
}

/// Accepts callers and runs one supervisor task per connection.
pub struct Listener {
    listener: TcpListener,
    supervisor: Arc<Supervisor>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, supervisor: Supervisor) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Listen {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self::new(listener, supervisor))
    }

    pub fn new(listener: TcpListener, supervisor: Supervisor) -> Self {
        Self {
            listener,
            supervisor: Arc::new(supervisor),
        }
    }

    /// Assemble a listener from config, host key and credential store.
    pub async fn from_config(
        config: &Config,
        host_key: PrivateKey,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let supervisor = Supervisor::new(
            Arc::new(server_config(config, host_key)),
            Dialer::new(&config.outbound),
            store,
        );
        Self::bind(config.listen, supervisor).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "Listening for callers");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let supervisor = Arc::clone(&self.supervisor);
            let span = info_span!("connection", %peer);
            tokio::spawn(
                async move {
                    info!("Caller connected");
                    match supervisor.handle(stream, peer).await {
                        Ok(()) => info!("Connection closed"),
                        Err(e) => warn!(kind = ?e.kind(), error = %e, "Connection failed"),
                    }
                }
                .instrument(span),
            );
        }
    }
}
