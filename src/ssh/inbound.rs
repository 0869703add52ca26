// ABOUTME: russh server handler for callers connecting to the bastion.
// ABOUTME: Authenticates against the credential store and turns callbacks into events.

use super::error::{AuthFormatSnafu, ConnectionError, CredentialLookupSnafu};
use super::events::{
    CHANNEL_QUEUE_DEPTH, ChannelEvent, ChannelKind, ChannelOffer, ChannelRequest, GlobalRequest,
};
use crate::credentials::CredentialStore;
use crate::types::{Fingerprint, Login};
use bytes::Bytes;
use russh::keys::ssh_key::PublicKey;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet, Pty, Sig};
use secrecy::SecretString;
use snafu::ResultExt;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Outcome of inbound authentication, handed to the supervisor once.
pub struct Authenticated {
    pub login: Login,
    pub fingerprint: Fingerprint,
    pub password: SecretString,
    pub handle: server::Handle,
}

impl fmt::Debug for Authenticated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticated")
            .field("login", &self.login)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Receiving ends of everything the handler reports.
///
/// `offers` and `globals` end when the inbound session is gone.
pub struct InboundEvents {
    pub auth: oneshot::Receiver<Result<Authenticated, ConnectionError>>,
    pub offers: mpsc::UnboundedReceiver<ChannelOffer>,
    pub globals: mpsc::UnboundedReceiver<GlobalRequest>,
}

/// Verified key and looked-up password, waiting for `auth_succeeded`.
struct Verified {
    login: Login,
    fingerprint: Fingerprint,
    password: SecretString,
}

pub struct InboundHandler {
    peer: SocketAddr,
    store: Arc<dyn CredentialStore>,
    auth: Option<oneshot::Sender<Result<Authenticated, ConnectionError>>>,
    verified: Option<Verified>,
    offers: mpsc::UnboundedSender<ChannelOffer>,
    globals: mpsc::UnboundedSender<GlobalRequest>,
    channels: HashMap<ChannelId, mpsc::Sender<ChannelEvent>>,
}

/// Public key is the only method callers may use.
pub fn inbound_methods() -> MethodSet {
    let mut methods = MethodSet::empty();
    methods.push(MethodKind::PublicKey);
    methods
}

impl InboundHandler {
    pub fn new(peer: SocketAddr, store: Arc<dyn CredentialStore>) -> (Self, InboundEvents) {
        let (auth_tx, auth_rx) = oneshot::channel();
        let (offers_tx, offers_rx) = mpsc::unbounded_channel();
        let (globals_tx, globals_rx) = mpsc::unbounded_channel();

        let handler = Self {
            peer,
            store,
            auth: Some(auth_tx),
            verified: None,
            offers: offers_tx,
            globals: globals_tx,
            channels: HashMap::new(),
        };
        let events = InboundEvents {
            auth: auth_rx,
            offers: offers_rx,
            globals: globals_rx,
        };
        (handler, events)
    }

    /// Report a fatal authentication failure and abort the handshake.
    fn fail(&mut self, error: ConnectionError) -> russh::Error {
        warn!(peer = %self.peer, kind = ?error.kind(), error = %error, "Inbound authentication failed");
        if let Some(tx) = self.auth.take() {
            let _ = tx.send(Err(error));
        }
        russh::Error::Disconnect
    }

    fn parse_login(&mut self, user: &str) -> Result<Login, russh::Error> {
        Login::parse(user)
            .context(AuthFormatSnafu { username: user })
            .map_err(|e| self.fail(e))
    }

    /// Accept the channel and hand it to the supervisor, which mirrors it
    /// on the target or closes it again.
    fn offer(&mut self, channel: Channel<Msg>, kind: ChannelKind) -> bool {
        let id = channel.id();
        // Traffic arrives through the handler callbacks, not the channel.
        drop(channel);

        let (events_tx, events_rx) = mpsc::channel(CHANNEL_QUEUE_DEPTH);
        let offer = ChannelOffer {
            id,
            kind,
            events: events_rx,
        };
        if self.offers.send(offer).is_err() {
            return false;
        }
        self.channels.insert(id, events_tx);
        true
    }

    /// Queue an event for the channel's relay. Waits while the queue is
    /// full, which holds back the caller's whole session.
    async fn forward(&mut self, channel: ChannelId, event: ChannelEvent) {
        let closing = matches!(event, ChannelEvent::Close);
        let Some(tx) = self.channels.get(&channel) else {
            debug!(peer = %self.peer, %channel, "Event for unknown channel dropped");
            return;
        };
        let delivered = tx.send(event).await.is_ok();
        if closing || !delivered {
            self.channels.remove(&channel);
        }
    }

    async fn request(&mut self, channel: ChannelId, request: ChannelRequest) {
        debug!(peer = %self.peer, %channel, request = request.name(), "Channel request");
        self.forward(channel, ChannelEvent::Request(request)).await;
    }

    fn global(&mut self, request: GlobalRequest) {
        let _ = self.globals.send(request);
    }
}

impl server::Handler for InboundHandler {
    type Error = russh::Error;

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.parse_login(user)?;
        debug!(
            peer = %self.peer,
            fingerprint = %Fingerprint::of(public_key),
            "Public key offered"
        );
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let login = self.parse_login(user)?;
        let fingerprint = Fingerprint::of(public_key);
        info!(
            peer = %self.peer,
            user = login.user(),
            target = %login.target(),
            %fingerprint,
            "Public key verified"
        );

        let lookup = self.store.password_for(login.target()).await;
        let password = lookup
            .context(CredentialLookupSnafu {
                target: login.target().clone(),
            })
            .map_err(|e| self.fail(e))?;

        self.verified = Some(Verified {
            login,
            fingerprint,
            password,
        });
        Ok(Auth::Accept)
    }

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Reject {
            proceed_with_methods: Some(inbound_methods()),
            partial_success: false,
        })
    }

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        let (Some(verified), Some(tx)) = (self.verified.take(), self.auth.take()) else {
            return Err(russh::Error::Disconnect);
        };
        let authenticated = Authenticated {
            login: verified.login,
            fingerprint: verified.fingerprint,
            password: verified.password,
            handle: session.handle(),
        };
        tx.send(Ok(authenticated))
            .map_err(|_| russh::Error::Disconnect)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.offer(channel, ChannelKind::Session))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let kind = ChannelKind::DirectTcpip {
            host: host_to_connect.to_string(),
            port: port_to_connect,
            originator_address: originator_address.to_string(),
            originator_port,
        };
        Ok(self.offer(channel, kind))
    }

    async fn channel_open_direct_streamlocal(
        &mut self,
        channel: Channel<Msg>,
        socket_path: &str,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let kind = ChannelKind::DirectStreamlocal {
            socket_path: socket_path.to_string(),
        };
        Ok(self.offer(channel, kind))
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, ChannelEvent::Data(Bytes::copy_from_slice(data))).await;
        Ok(())
    }

    async fn extended_data(
        &mut self,
        channel: ChannelId,
        code: u32,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(
            channel,
            ChannelEvent::ExtendedData {
                ext: code,
                data: Bytes::copy_from_slice(data),
            },
        )
        .await;
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, ChannelEvent::Eof).await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, ChannelEvent::Close).await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(
            channel,
            ChannelRequest::Pty {
                term: term.to_string(),
                col_width,
                row_height,
                pix_width,
                pix_height,
                modes: modes.to_vec(),
            },
        )
        .await;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(channel, ChannelRequest::Shell).await;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(
            channel,
            ChannelRequest::Exec {
                command: Bytes::copy_from_slice(data),
            },
        )
        .await;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(
            channel,
            ChannelRequest::Subsystem {
                name: name.to_string(),
            },
        )
        .await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(
            channel,
            ChannelRequest::Env {
                name: variable_name.to_string(),
                value: variable_value.to_string(),
            },
        )
        .await;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(
            channel,
            ChannelRequest::WindowChange {
                col_width,
                row_height,
                pix_width,
                pix_height,
            },
        )
        .await;
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(channel, ChannelRequest::Signal(signal)).await;
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        single_connection: bool,
        x11_auth_protocol: &str,
        x11_auth_cookie: &str,
        x11_screen_number: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.request(
            channel,
            ChannelRequest::X11 {
                single_connection,
                auth_protocol: x11_auth_protocol.to_string(),
                auth_cookie: x11_auth_cookie.to_string(),
                screen_number: x11_screen_number,
            },
        )
        .await;
        Ok(())
    }

    async fn agent_request(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(peer = %self.peer, %channel, "Agent forwarding refused");
        Ok(false)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.global(GlobalRequest::TcpipForward {
            address: address.to_string(),
            port: *port,
        });
        Ok(false)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.global(GlobalRequest::CancelTcpipForward {
            address: address.to_string(),
            port,
        });
        Ok(false)
    }
}
