// ABOUTME: Owns one caller connection from handshake to teardown.
// ABOUTME: Authenticates, enforces the access list, dials the target and dispatches relays.

use super::error::{ConnectionError, CredentialLookupSnafu, RelayError};
use super::events::{ChannelOffer, GlobalRequest};
use super::inbound::{Authenticated, InboundEvents, InboundHandler};
use super::outbound::{Dialer, Outbound};
use super::relay::{ChannelRelay, InboundLeg, OutboundLeg, RelayEnd};
use crate::credentials::CredentialStore;
use russh::server::{self, Handle};
use russh::{ChannelId, Disconnect};
use snafu::ResultExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

type RelayResult = (ChannelId, Result<RelayEnd, RelayError>);

/// Shared by every connection the listener accepts.
pub struct Supervisor {
    server_config: Arc<server::Config>,
    dialer: Dialer,
    store: Arc<dyn CredentialStore>,
}

impl Supervisor {
    pub fn new(
        server_config: Arc<server::Config>,
        dialer: Dialer,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            server_config,
            dialer,
            store,
        }
    }

    /// Mediate one caller connection until both of its event streams end.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (handler, events) = InboundHandler::new(peer, Arc::clone(&self.store));
        let InboundEvents {
            auth,
            offers,
            globals,
        } = events;

        let running = server::run_stream(Arc::clone(&self.server_config), stream, handler)
            .await
            .map_err(|e| ConnectionError::Handshake {
                reason: e.to_string(),
            })?;
        let session = tokio::spawn(running);

        let authenticated = match auth.await {
            Ok(Ok(authenticated)) => authenticated,
            Ok(Err(error)) => return Err(error),
            Err(_) => {
                let reason = match session.await {
                    Ok(Err(e)) => e.to_string(),
                    _ => "caller left before authenticating".to_string(),
                };
                return Err(ConnectionError::Handshake { reason });
            }
        };

        let Authenticated {
            login,
            fingerprint,
            password,
            handle,
        } = authenticated;
        let target = login.target().clone();

        let allowed = match self.store.is_authorized(&fingerprint, &target).await {
            Ok(allowed) => allowed,
            Err(e) if e.is_not_found() => false,
            Err(source) => {
                let error = ConnectionError::CredentialLookup {
                    target: target.clone(),
                    source,
                };
                reject(&handle, "credential lookup failed").await;
                return Err(error);
            }
        };
        if !allowed {
            warn!(%peer, %fingerprint, %target, "Access list rejects key");
            drop((offers, globals));
            reject(&handle, "access denied").await;
            return Err(ConnectionError::AccessDenied {
                fingerprint,
                target,
            });
        }
        info!(%peer, %fingerprint, %target, "Access granted");

        let pinned = match self
            .store
            .pinned_host_key(&target)
            .await
            .context(CredentialLookupSnafu {
                target: target.clone(),
            }) {
            Ok(pinned) => pinned,
            Err(error) => {
                reject(&handle, "credential lookup failed").await;
                return Err(error);
            }
        };

        let outbound = match self.dialer.dial(&login, &password, pinned).await {
            Ok(outbound) => outbound,
            Err(source) => {
                let error = ConnectionError::dial(&target, source);
                reject(&handle, "target unavailable").await;
                return Err(error);
            }
        };
        drop(password);

        relay_all(&handle, &outbound, offers, globals).await;

        debug!(%peer, %target, "Relaying finished, disconnecting target");
        if let Err(e) = outbound.disconnect().await {
            debug!(%target, error = %e, "Outbound disconnect failed");
        }
        if let Ok(Err(e)) = session.await {
            debug!(%peer, error = %e, "Inbound session ended with error");
        }
        Ok(())
    }
}

/// Tell the caller we are done with them.
async fn reject(handle: &Handle, description: &str) {
    let _ = handle
        .disconnect(
            Disconnect::ByApplication,
            description.to_string(),
            "en".to_string(),
        )
        .await;
}

/// The relaying loop: drain offers and global requests until both streams
/// are exhausted, then wait for every relay to finish.
async fn relay_all(
    handle: &Handle,
    outbound: &Outbound,
    mut offers: mpsc::UnboundedReceiver<ChannelOffer>,
    mut globals: mpsc::UnboundedReceiver<GlobalRequest>,
) {
    let mut relays: JoinSet<RelayResult> = JoinSet::new();
    let mut offers_done = false;
    let mut globals_done = false;

    while !(offers_done && globals_done) {
        tokio::select! {
            offer = offers.recv(), if !offers_done => match offer {
                Some(offer) => dispatch(handle, outbound, offer, &mut relays).await,
                None => offers_done = true,
            },

            request = globals.recv(), if !globals_done => match request {
                Some(request) => {
                    info!(target = %outbound.target(), %request, "Refusing global request");
                }
                None => globals_done = true,
            },

            Some(joined) = relays.join_next(), if !relays.is_empty() => log_relay(joined),
        }
    }

    while let Some(joined) = relays.join_next().await {
        log_relay(joined);
    }
}

/// Mirror one accepted channel on the target and start its relay. If the
/// target refuses, the caller's channel is closed again.
async fn dispatch(
    handle: &Handle,
    outbound: &Outbound,
    offer: ChannelOffer,
    relays: &mut JoinSet<RelayResult>,
) {
    let ChannelOffer { id, kind, events } = offer;

    let channel = match outbound.open(&kind).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(channel = %id, %kind, error = %e, "Channel setup failed");
            drop(events);
            let _ = handle.close(id).await;
            return;
        }
    };

    info!(channel = %id, %kind, "Relaying channel");
    let relay = ChannelRelay::new(
        InboundLeg::new(handle.clone(), id, events),
        OutboundLeg::new(channel),
    );
    relays.spawn(async move { (id, relay.run().await) });
}

fn log_relay(joined: Result<RelayResult, tokio::task::JoinError>) {
    match joined {
        Ok((channel, Ok(end))) => debug!(%channel, ?end, "Relay finished"),
        Ok((channel, Err(e))) => warn!(%channel, error = %e, "Relay failed"),
        Err(e) => warn!(error = %e, "Relay task panicked"),
    }
}
