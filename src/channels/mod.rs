//! Chat Channels
//!
//! Discord is the only platform the relay talks to; the relay itself only
//! sees [`ChatTransport`].

pub mod discord;
pub mod gateway;
pub mod transport;

pub use discord::{DiscordClient, DiscordConfig, DiscordEmbed, DiscordError, DiscordIntents};
pub use gateway::{Gateway, GatewayError, GatewayEvent};
pub use transport::{
    ChannelError, ChannelInfo, ChannelResult, ChatTransport, IncomingMessage, OutgoingMessage,
};
