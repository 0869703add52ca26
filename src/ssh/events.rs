// ABOUTME: Events flowing from the inbound SSH handler to the supervisor and relays.
// ABOUTME: Channel offers, per-channel traffic and connection-wide global requests.

use bytes::Bytes;
use russh::{ChannelId, Pty, Sig};
use std::fmt;
use tokio::sync::mpsc;

/// Channel type plus the type-specific open parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Session,
    DirectTcpip {
        host: String,
        port: u32,
        originator_address: String,
        originator_port: u32,
    },
    DirectStreamlocal {
        socket_path: String,
    },
}

impl ChannelKind {
    /// SSH channel type name.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Session => "session",
            ChannelKind::DirectTcpip { .. } => "direct-tcpip",
            ChannelKind::DirectStreamlocal { .. } => "direct-streamlocal",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Session => write!(f, "session"),
            ChannelKind::DirectTcpip { host, port, .. } => {
                write!(f, "direct-tcpip {host}:{port}")
            }
            ChannelKind::DirectStreamlocal { socket_path } => {
                write!(f, "direct-streamlocal {socket_path}")
            }
        }
    }
}

/// Channel-scoped requests, in either direction.
#[derive(Debug, Clone)]
pub enum ChannelRequest {
    Pty {
        term: String,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: Vec<(Pty, u32)>,
    },
    Shell,
    Exec {
        command: Bytes,
    },
    Subsystem {
        name: String,
    },
    Env {
        name: String,
        value: String,
    },
    WindowChange {
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    },
    Signal(Sig),
    X11 {
        single_connection: bool,
        auth_protocol: String,
        auth_cookie: String,
        screen_number: u32,
    },
    ExitStatus(u32),
    ExitSignal {
        signal: Sig,
        core_dumped: bool,
        message: String,
        lang: String,
    },
}

impl ChannelRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelRequest::Pty { .. } => "pty-req",
            ChannelRequest::Shell => "shell",
            ChannelRequest::Exec { .. } => "exec",
            ChannelRequest::Subsystem { .. } => "subsystem",
            ChannelRequest::Env { .. } => "env",
            ChannelRequest::WindowChange { .. } => "window-change",
            ChannelRequest::Signal(_) => "signal",
            ChannelRequest::X11 { .. } => "x11-req",
            ChannelRequest::ExitStatus(_) => "exit-status",
            ChannelRequest::ExitSignal { .. } => "exit-signal",
        }
    }
}

/// Everything one side of a channel can say to the other.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Data(Bytes),
    ExtendedData { ext: u32, data: Bytes },
    Eof,
    Close,
    Request(ChannelRequest),
    /// Target's answer to a forwarded request.
    Reply(bool),
}

/// Events queued per inbound channel before the caller is held back.
pub const CHANNEL_QUEUE_DEPTH: usize = 32;

/// A channel the caller opened, to be mirrored on the target.
///
/// The inbound channel is already accepted; if the target refuses the
/// mirror, the supervisor closes it.
pub struct ChannelOffer {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub events: mpsc::Receiver<ChannelEvent>,
}

impl fmt::Debug for ChannelOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelOffer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Connection-level requests from the caller. Observed, never forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalRequest {
    TcpipForward { address: String, port: u32 },
    CancelTcpipForward { address: String, port: u32 },
}

impl fmt::Display for GlobalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalRequest::TcpipForward { address, port } => {
                write!(f, "tcpip-forward {address}:{port}")
            }
            GlobalRequest::CancelTcpipForward { address, port } => {
                write!(f, "cancel-tcpip-forward {address}:{port}")
            }
        }
    }
}
