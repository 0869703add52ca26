// ABOUTME: SSH mediation engine: inbound server, outbound client and channel relays.
// ABOUTME: The supervisor ties them together for one caller connection.

mod error;
mod events;
mod inbound;
mod outbound;
mod relay;
mod supervisor;

pub use error::{ChannelSetupError, ConnectionError, ConnectionErrorKind, OutboundError, RelayError};
pub use events::{
    CHANNEL_QUEUE_DEPTH, ChannelEvent, ChannelKind, ChannelOffer, ChannelRequest, GlobalRequest,
};
pub use inbound::{Authenticated, InboundEvents, InboundHandler, inbound_methods};
pub use outbound::{Dialer, Outbound, PinnedHostKey, keyboard_interactive_answers};
pub use relay::{
    CLOSE_LINGER, ChannelLeg, ChannelRelay, EventSink, EventSource, InboundLeg, OutboundLeg, RelayEnd,
    Side,
};
pub use supervisor::Supervisor;
