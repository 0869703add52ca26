// ABOUTME: In-process SSH server standing in for a target behind the bastion.
// ABOUTME: Password or keyboard-interactive auth, echoing channels, and counters for what it saw.

use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, PrivateKey};
use russh::server::{self, Auth, Msg, Response, Session};
use std::borrow::Cow;
use russh::{Channel, ChannelId, CryptoVec, MethodKind, MethodSet};
use jumpgate::types::Fingerprint;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// Exit status the target reports for every exec.
pub const EXEC_EXIT_STATUS: u32 = 7;

/// Parameters of a direct-tcpip open, as the target received them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectTcpip {
    pub host: String,
    pub port: u32,
    pub originator_address: String,
    pub originator_port: u32,
}

#[derive(Default)]
pub struct TargetStats {
    pub connections: AtomicUsize,
    pub channels_opened: AtomicUsize,
    pub channels_closed: AtomicUsize,
    pub agent_requests: AtomicUsize,
    pub users: Mutex<Vec<String>>,
    pub env: Mutex<Vec<(String, String)>>,
    pub direct_tcpip: Mutex<Vec<DirectTcpip>>,
}

impl TargetStats {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.channels_opened.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.channels_closed.load(Ordering::SeqCst)
    }

    pub fn agent_requests(&self) -> usize {
        self.agent_requests.load(Ordering::SeqCst)
    }

    pub fn users(&self) -> Vec<String> {
        self.users.lock().unwrap().clone()
    }
}

/// Prompts per keyboard-interactive round; every answer must be the password.
const CHALLENGE_ROUNDS: &[&[&str]] = &[&["Password: ", "Verification code: "], &["Password again: "]];

fn challenge(prompts: &[&'static str]) -> Auth {
    Auth::Partial {
        name: Cow::Borrowed("target login"),
        instructions: Cow::Borrowed(""),
        prompts: Cow::Owned(
            prompts
                .iter()
                .map(|prompt| (Cow::Borrowed(*prompt), false))
                .collect(),
        ),
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

pub struct Target {
    pub addr: SocketAddr,
    pub fingerprint: Fingerprint,
    pub stats: Arc<TargetStats>,
}

impl Target {
    /// The `host:port` the bastion dials.
    pub fn target(&self) -> String {
        self.addr.to_string()
    }

    /// Start a target accepting `password` for any user.
    pub async fn start(password: &str) -> Target {
        Self::spawn(password, false).await
    }

    /// Start a target that only offers keyboard-interactive login, with a
    /// two-round challenge answered by `password` at every prompt.
    pub async fn start_keyboard_interactive(password: &str) -> Target {
        Self::spawn(password, true).await
    }

    async fn spawn(password: &str, keyboard_interactive: bool) -> Target {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let fingerprint = Fingerprint::of(key.public_key());

        let mut methods = MethodSet::empty();
        methods.push(if keyboard_interactive {
            MethodKind::KeyboardInteractive
        } else {
            MethodKind::Password
        });
        let config = Arc::new(server::Config {
            keys: vec![key],
            methods,
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(TargetStats::default());

        let accept_stats = Arc::clone(&stats);
        let password = password.to_string();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_stats.connections.fetch_add(1, Ordering::SeqCst);
                let handler = TargetHandler {
                    password: password.clone(),
                    stats: Arc::clone(&accept_stats),
                    keyboard_interactive,
                    round: 0,
                };
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    if let Ok(running) = server::run_stream(config, stream, handler).await {
                        let _ = running.await;
                    }
                });
            }
        });

        Target {
            addr,
            fingerprint,
            stats,
        }
    }
}

struct TargetHandler {
    password: String,
    stats: Arc<TargetStats>,
    /// russh asks about passwords even when the method is not offered.
    keyboard_interactive: bool,
    /// Keyboard-interactive round whose answers are expected next.
    round: usize,
}

impl server::Handler for TargetHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if !self.keyboard_interactive && password == self.password {
            self.stats.users.lock().unwrap().push(user.to_string());
            Ok(Auth::Accept)
        } else {
            Ok(reject())
        }
    }

    async fn auth_keyboard_interactive<'a>(
        &'a mut self,
        user: &str,
        _submethods: &str,
        response: Option<Response<'a>>,
    ) -> Result<Auth, Self::Error> {
        if !self.keyboard_interactive {
            return Ok(reject());
        }
        let Some(response) = response else {
            self.round = 0;
            return Ok(challenge(CHALLENGE_ROUNDS[0]));
        };
        let answers: Vec<String> = response
            .map(|answer| String::from_utf8_lossy(&answer).to_string())
            .collect();
        let expected = CHALLENGE_ROUNDS[self.round].len();
        if answers.len() != expected || answers.iter().any(|a| *a != self.password) {
            return Ok(reject());
        }

        self.round += 1;
        match CHALLENGE_ROUNDS.get(self.round) {
            Some(prompts) => Ok(challenge(prompts)),
            None => {
                self.stats.users.lock().unwrap().push(user.to_string());
                Ok(Auth::Accept)
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.stats.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.stats.channels_opened.fetch_add(1, Ordering::SeqCst);
        self.stats.direct_tcpip.lock().unwrap().push(DirectTcpip {
            host: host_to_connect.to_string(),
            port: port_to_connect,
            originator_address: originator_address.to_string(),
            originator_port,
        });
        Ok(true)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel);
        let output = format!("ran: {}", String::from_utf8_lossy(data));
        let _ = session.data(channel, CryptoVec::from_slice(output.as_bytes()));
        let _ = session.extended_data(channel, 1, CryptoVec::from_slice(b"warning"));
        let _ = session.exit_status_request(channel, EXEC_EXIT_STATUS);
        let _ = session.eof(channel);
        let _ = session.close(channel);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.stats
            .env
            .lock()
            .unwrap()
            .push((variable_name.to_string(), variable_value.to_string()));
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn agent_request(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.stats.agent_requests.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.data(channel, CryptoVec::from_slice(data));
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.stats.channels_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
