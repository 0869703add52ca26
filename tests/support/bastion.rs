// ABOUTME: Harness running a supervisor against real TCP sockets.
// ABOUTME: Includes a credential store that counts every query it answers.

use async_trait::async_trait;
use jumpgate::config::{Config, OutboundConfig};
use jumpgate::credentials::{CredentialStore, FileStore, StoreError};
use jumpgate::server::server_config;
use jumpgate::ssh::{ConnectionError, Dialer, Supervisor};
use jumpgate::types::{Fingerprint, Target};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, PrivateKey};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Wraps a store and counts lookups.
pub struct RecordingStore {
    inner: FileStore,
    queries: AtomicUsize,
}

impl RecordingStore {
    pub fn new(inner: FileStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            queries: AtomicUsize::new(0),
        })
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn password_for(&self, target: &Target) -> Result<SecretString, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.password_for(target).await
    }

    async fn pinned_host_key(&self, target: &Target) -> Result<Fingerprint, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.pinned_host_key(target).await
    }

    async fn is_authorized(&self, key: &Fingerprint, target: &Target) -> Result<bool, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.is_authorized(key, target).await
    }
}

pub fn supervisor(store: Arc<dyn CredentialStore>) -> Supervisor {
    let config = Config {
        auth_rejection_time: Duration::from_millis(10),
        ..Config::template()
    };
    let host_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    Supervisor::new(
        Arc::new(server_config(&config, host_key)),
        Dialer::new(&OutboundConfig::default()),
        store,
    )
}

/// Accept exactly one caller and mediate it, returning the supervisor's verdict.
pub async fn serve_one(
    store: Arc<dyn CredentialStore>,
) -> (SocketAddr, JoinHandle<Result<(), ConnectionError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let supervisor = supervisor(store);
    let task = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        supervisor.handle(stream, peer).await
    });
    (addr, task)
}

/// Wait for the supervisor to finish.
pub async fn verdict(task: JoinHandle<Result<(), ConnectionError>>) -> Result<(), ConnectionError> {
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("supervisor should finish in time")
        .expect("supervisor task should not panic")
}
