// ABOUTME: Bidirectional relay between one inbound and one outbound channel.
// ABOUTME: Copies data, forwards requests and replies, and propagates EOF and close.

use super::error::RelayError;
use super::events::{ChannelEvent, ChannelRequest};
use async_trait::async_trait;
use bytes::Bytes;
use russh::client;
use russh::server::Handle;
use russh::{Channel, ChannelId, ChannelMsg, ChannelReadHalf, ChannelWriteHalf, CryptoVec};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

/// How long a channel that has seen EOF both ways waits for a trailing
/// exit status and close before it is torn down.
pub const CLOSE_LINGER: Duration = Duration::from_secs(2);

/// Reading half of one end: what that end's peer says.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, `None` once the channel is gone.
    async fn recv(&mut self) -> Option<ChannelEvent>;
}

/// Writing half of one end.
#[async_trait]
pub trait EventSink: Send {
    /// Deliver an event to this end's peer.
    async fn send(&mut self, event: ChannelEvent) -> Result<(), RelayError>;

    /// Best effort close; the channel may already be gone.
    async fn close(&mut self);
}

/// One end of a channel pairing. The relay drives the halves concurrently,
/// so a stalled writer never stops the reader.
pub trait ChannelLeg: Send {
    type Source: EventSource;
    type Sink: EventSink;

    fn split(self) -> (Self::Source, Self::Sink);
}

#[async_trait]
impl EventSource for mpsc::Receiver<ChannelEvent> {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        mpsc::Receiver::recv(self).await
    }
}

/// The caller's side: events arrive through the server handler callbacks,
/// outgoing traffic goes through the session handle.
pub struct InboundLeg {
    sink: InboundSink,
    events: mpsc::Receiver<ChannelEvent>,
}

impl InboundLeg {
    pub fn new(handle: Handle, id: ChannelId, events: mpsc::Receiver<ChannelEvent>) -> Self {
        Self {
            sink: InboundSink { handle, id },
            events,
        }
    }
}

impl ChannelLeg for InboundLeg {
    type Source = mpsc::Receiver<ChannelEvent>;
    type Sink = InboundSink;

    fn split(self) -> (Self::Source, Self::Sink) {
        (self.events, self.sink)
    }
}

pub struct InboundSink {
    handle: Handle,
    id: ChannelId,
}

#[async_trait]
impl EventSink for InboundSink {
    async fn send(&mut self, event: ChannelEvent) -> Result<(), RelayError> {
        let id = self.id;
        let sent = match event {
            ChannelEvent::Data(data) => self
                .handle
                .data(id, CryptoVec::from_slice(&data))
                .await
                .map_err(drop),
            ChannelEvent::ExtendedData { ext, data } => self
                .handle
                .extended_data(id, ext, CryptoVec::from_slice(&data))
                .await
                .map_err(drop),
            ChannelEvent::Eof => self.handle.eof(id).await,
            ChannelEvent::Close => self.handle.close(id).await,
            // russh drops replies the caller did not ask for.
            ChannelEvent::Reply(true) => self.handle.channel_success(id).await,
            ChannelEvent::Reply(false) => self.handle.channel_failure(id).await,
            ChannelEvent::Request(ChannelRequest::ExitStatus(status)) => {
                self.handle.exit_status_request(id, status).await
            }
            ChannelEvent::Request(ChannelRequest::ExitSignal {
                signal,
                core_dumped,
                message,
                lang,
            }) => {
                self.handle
                    .exit_signal_request(id, signal, core_dumped, message, lang)
                    .await
            }
            ChannelEvent::Request(request) => {
                debug!(channel = %id, request = request.name(), "Dropping request a server cannot send");
                Ok(())
            }
        };
        sent.map_err(|()| RelayError::InboundGone)
    }

    async fn close(&mut self) {
        let _ = self.handle.close(self.id).await;
    }
}

/// The target's side: a channel on the bastion's client connection.
pub struct OutboundLeg {
    channel: Channel<client::Msg>,
}

impl OutboundLeg {
    pub fn new(channel: Channel<client::Msg>) -> Self {
        Self { channel }
    }
}

impl ChannelLeg for OutboundLeg {
    type Source = OutboundSource;
    type Sink = OutboundSink;

    fn split(self) -> (Self::Source, Self::Sink) {
        let (read, write) = self.channel.split();
        (OutboundSource { read }, OutboundSink { write })
    }
}

pub struct OutboundSource {
    read: ChannelReadHalf,
}

#[async_trait]
impl EventSource for OutboundSource {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.read.wait().await? {
                ChannelMsg::Data { data } => ChannelEvent::Data(Bytes::copy_from_slice(&data)),
                ChannelMsg::ExtendedData { data, ext } => ChannelEvent::ExtendedData {
                    ext,
                    data: Bytes::copy_from_slice(&data),
                },
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => ChannelEvent::Close,
                ChannelMsg::Success => ChannelEvent::Reply(true),
                ChannelMsg::Failure => ChannelEvent::Reply(false),
                ChannelMsg::ExitStatus { exit_status } => {
                    ChannelEvent::Request(ChannelRequest::ExitStatus(exit_status))
                }
                ChannelMsg::ExitSignal {
                    signal_name,
                    core_dumped,
                    error_message,
                    lang_tag,
                } => ChannelEvent::Request(ChannelRequest::ExitSignal {
                    signal: signal_name,
                    core_dumped,
                    message: error_message,
                    lang: lang_tag,
                }),
                _ => continue,
            };
            return Some(event);
        }
    }
}

pub struct OutboundSink {
    write: ChannelWriteHalf<client::Msg>,
}

impl OutboundSink {
    /// Requests always ask the target for a reply, so the caller gets an
    /// answer whenever it wanted one.
    async fn request(&self, request: ChannelRequest) -> Result<(), russh::Error> {
        let channel = &self.write;
        match request {
            ChannelRequest::Pty {
                term,
                col_width,
                row_height,
                pix_width,
                pix_height,
                modes,
            } => {
                channel
                    .request_pty(true, &term, col_width, row_height, pix_width, pix_height, &modes)
                    .await
            }
            ChannelRequest::Shell => channel.request_shell(true).await,
            ChannelRequest::Exec { command } => channel.exec(true, command.to_vec()).await,
            ChannelRequest::Subsystem { name } => channel.request_subsystem(true, &name).await,
            ChannelRequest::Env { name, value } => channel.set_env(true, name, value).await,
            ChannelRequest::WindowChange {
                col_width,
                row_height,
                pix_width,
                pix_height,
            } => {
                channel
                    .window_change(col_width, row_height, pix_width, pix_height)
                    .await
            }
            ChannelRequest::Signal(signal) => channel.signal(signal).await,
            ChannelRequest::X11 {
                single_connection,
                auth_protocol,
                auth_cookie,
                screen_number,
            } => {
                channel
                    .request_x11(
                        true,
                        single_connection,
                        auth_protocol,
                        auth_cookie,
                        screen_number,
                    )
                    .await
            }
            request @ (ChannelRequest::ExitStatus(_) | ChannelRequest::ExitSignal { .. }) => {
                debug!(
                    channel = %channel.id(),
                    request = request.name(),
                    "Dropping request a client cannot send"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EventSink for OutboundSink {
    async fn send(&mut self, event: ChannelEvent) -> Result<(), RelayError> {
        match event {
            ChannelEvent::Data(data) => self.write.data(&data[..]).await?,
            ChannelEvent::ExtendedData { ext, data } => {
                self.write.extended_data(ext, &data[..]).await?
            }
            ChannelEvent::Eof => self.write.eof().await?,
            ChannelEvent::Close => self.write.close().await?,
            ChannelEvent::Request(request) => self.request(request).await?,
            // Targets only ask the client for keepalives, which russh answers.
            ChannelEvent::Reply(_) => {}
        }
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.write.close().await;
    }
}

/// Which end of a pairing produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Inbound,
    Outbound,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Inbound => write!(f, "inbound"),
            Side::Outbound => write!(f, "outbound"),
        }
    }
}

/// Why a relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// One side closed the channel.
    Closed(Side),
    /// Both sides sent EOF.
    DoubleEof,
    /// One side's channel vanished without a close.
    Gone(Side),
}

#[derive(Default)]
struct EofSeen {
    inbound: AtomicBool,
    outbound: AtomicBool,
    both: Notify,
}

impl EofSeen {
    fn mark(&self, side: Side) {
        let flag = match side {
            Side::Inbound => &self.inbound,
            Side::Outbound => &self.outbound,
        };
        flag.store(true, Ordering::SeqCst);
        if self.both_sides() {
            self.both.notify_one();
        }
    }

    fn both_sides(&self) -> bool {
        self.inbound.load(Ordering::SeqCst) && self.outbound.load(Ordering::SeqCst)
    }
}

/// Copies traffic between a caller channel and its target channel.
pub struct ChannelRelay<I, O> {
    inbound: I,
    outbound: O,
    linger: Duration,
}

impl<I: ChannelLeg, O: ChannelLeg> ChannelRelay<I, O> {
    pub fn new(inbound: I, outbound: O) -> Self {
        Self {
            inbound,
            outbound,
            linger: CLOSE_LINGER,
        }
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Run until either side closes, both sides have sent EOF, or a send
    /// fails. Both channels are closed before returning.
    ///
    /// Target traffic is read into an unbounded queue and written to the
    /// caller by its own future. Reading the target channel therefore never
    /// waits on the caller's window, and the target's window adjustments
    /// keep flowing while the caller is slow.
    pub async fn run(self) -> Result<RelayEnd, RelayError> {
        let (mut inbound_source, mut inbound_sink) = self.inbound.split();
        let (mut outbound_source, mut outbound_sink) = self.outbound.split();
        let (to_caller, for_caller) = mpsc::unbounded_channel();
        let eof = EofSeen::default();
        let caller_gone = Notify::new();
        let linger = self.linger;

        let control = async {
            let end = tokio::select! {
                end = upstream(&mut inbound_source, &mut outbound_sink, &eof) => end,
                end = downstream(&mut outbound_source, &to_caller, &eof) => end,
                end = settle(&eof, linger) => end,
                _ = caller_gone.notified() => Err(RelayError::InboundGone),
            };
            drop(to_caller);
            match end {
                Ok(RelayEnd::Closed(_)) if eof.both_sides() => Ok(RelayEnd::DoubleEof),
                end => end,
            }
        };
        let drained = drain(for_caller, &mut inbound_sink, &caller_gone);
        let (end, written) = tokio::join!(control, drained);

        inbound_sink.close().await;
        outbound_sink.close().await;
        let end = end?;
        written?;
        Ok(end)
    }
}

/// Caller to target. Waits on the target's window, which in turn holds
/// back the caller through the inbound queue.
async fn upstream(
    source: &mut impl EventSource,
    sink: &mut impl EventSink,
    eof: &EofSeen,
) -> Result<RelayEnd, RelayError> {
    loop {
        match source.recv().await {
            None => return Ok(RelayEnd::Gone(Side::Inbound)),
            Some(ChannelEvent::Close) => return Ok(RelayEnd::Closed(Side::Inbound)),
            Some(ChannelEvent::Eof) => {
                sink.send(ChannelEvent::Eof).await?;
                eof.mark(Side::Inbound);
            }
            Some(event) => sink.send(event).await?,
        }
    }
}

/// Target to caller queue. Never waits on the caller.
async fn downstream(
    source: &mut impl EventSource,
    to_caller: &mpsc::UnboundedSender<ChannelEvent>,
    eof: &EofSeen,
) -> Result<RelayEnd, RelayError> {
    loop {
        let event = match source.recv().await {
            None => return Ok(RelayEnd::Gone(Side::Outbound)),
            Some(ChannelEvent::Close) => return Ok(RelayEnd::Closed(Side::Outbound)),
            Some(event) => event,
        };
        let is_eof = matches!(event, ChannelEvent::Eof);
        to_caller
            .send(event)
            .map_err(|_| RelayError::InboundGone)?;
        if is_eof {
            eof.mark(Side::Outbound);
        }
    }
}

/// Targets usually report the exit status after their EOF; the other
/// directions keep relaying it while this waits.
async fn settle(eof: &EofSeen, linger: Duration) -> Result<RelayEnd, RelayError> {
    eof.both.notified().await;
    tokio::time::sleep(linger).await;
    Ok(RelayEnd::DoubleEof)
}

/// Queue to caller, until the queue is closed and empty. A failed send
/// stops the other directions through `caller_gone`.
async fn drain(
    mut for_caller: mpsc::UnboundedReceiver<ChannelEvent>,
    sink: &mut impl EventSink,
    caller_gone: &Notify,
) -> Result<(), RelayError> {
    while let Some(event) = for_caller.recv().await {
        if let Err(e) = sink.send(event).await {
            caller_gone.notify_one();
            return Err(e);
        }
    }
    Ok(())
}
