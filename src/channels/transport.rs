//! Chat Transport Trait
//!
//! The narrow surface the relay needs from a chat platform: look up a
//! channel, send text or one attachment, hide link previews, and show a
//! typing indicator.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use super::discord::DiscordEmbed;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur in channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Rate limited: retry after {0}s")]
    RateLimited(u64),

    #[error("Channel error: {0}")]
    Other(String),
}

/// Incoming chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Unique message ID
    pub id: String,
    /// Channel the message was posted in
    pub channel_id: String,
    /// Guild (server) ID; `None` for direct messages
    pub guild_id: Option<String>,
    /// Sender ID
    pub author_id: String,
    /// Sender name
    pub author_name: String,
    /// Whether the sender is a bot account
    pub author_is_bot: bool,
    /// Message text
    pub content: String,
}

/// Message to post, optionally as a reply
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub content: String,
    pub embed: Option<DiscordEmbed>,
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}

/// What the relay needs to know about a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub guild_id: Option<String>,
    /// Channel is marked age-restricted
    pub nsfw: bool,
}

/// Chat platform operations used by the relay
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Look up a channel
    async fn channel_info(&self, channel_id: &str) -> ChannelResult<ChannelInfo>;

    /// Look up a guild's display name
    async fn guild_name(&self, guild_id: &str) -> ChannelResult<String>;

    /// Send a text message, returning its ID
    async fn send_text(&self, channel_id: &str, message: OutgoingMessage)
        -> ChannelResult<String>;

    /// Send a message with a single file attachment, returning its ID
    async fn send_file(
        &self,
        channel_id: &str,
        message: OutgoingMessage,
        file: &Path,
        file_name: &str,
    ) -> ChannelResult<String>;

    /// Hide the link previews of a message
    async fn suppress_embeds(&self, channel_id: &str, message_id: &str) -> ChannelResult<()>;

    /// Show a typing indicator in a channel
    async fn start_typing(&self, channel_id: &str) -> ChannelResult<()>;
}
