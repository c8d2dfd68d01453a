//! Network subsystem: duplex streaming channel to the speech service

pub mod channel;
pub mod live;
pub mod protocol;

pub use channel::{ChannelEndpoint, ChannelSender, Connector, DuplexChannel, EventStream, InboundEvent};
pub use live::LiveConnector;
pub use protocol::{ClientMessage, ServerMessage};
