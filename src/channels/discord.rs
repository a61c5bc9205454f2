//! Discord Channel Implementation
//!
//! REST side of the Discord Bot API: messages with embeds and a single
//! attachment, embed suppression, typing, and channel/guild lookups.
//! Inbound events arrive through [`super::gateway`].

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::transport::{ChannelError, ChannelInfo, ChannelResult, ChatTransport, OutgoingMessage};

/// Discord REST API base URL
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Message flag that hides link previews.
const SUPPRESS_EMBEDS_FLAG: u64 = 1 << 2;

/// Discord channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordConfig {
    /// Bot token from Discord Developer Portal
    pub bot_token: String,
    /// User allowed to run whitelist commands; the application owner when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Prefix of owner commands, e.g. `!pixiv enable`
    pub command_prefix: String,
    /// Maximum message length
    pub max_message_length: usize,
    /// Intent configuration
    pub intents: DiscordIntents,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            owner_id: None,
            command_prefix: "!pixiv".to_string(),
            max_message_length: 2000,
            intents: DiscordIntents::default(),
        }
    }
}

/// Discord Gateway Intents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordIntents {
    pub guilds: bool,
    pub guild_messages: bool,
    pub direct_messages: bool,
    pub message_content: bool,
    pub guild_message_typing: bool,
    pub direct_message_typing: bool,
}

impl Default for DiscordIntents {
    fn default() -> Self {
        Self {
            guilds: true,
            guild_messages: true,
            direct_messages: true,
            message_content: true,
            guild_message_typing: false,
            direct_message_typing: false,
        }
    }
}

impl DiscordIntents {
    /// Gateway intent bitfield
    pub fn bits(&self) -> u32 {
        let mut bits = 0u32;
        if self.guilds { bits |= 1 << 0; }
        if self.guild_messages { bits |= 1 << 9; }
        if self.guild_message_typing { bits |= 1 << 11; }
        if self.direct_messages { bits |= 1 << 12; }
        if self.direct_message_typing { bits |= 1 << 14; }
        if self.message_content { bits |= 1 << 15; }
        bits
    }
}

/// Discord channel error
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Authentication error: {0}")]
    Authentication(String),
    #[error("Rate limited: retry after {0}s")]
    RateLimited(u64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DiscordError> for ChannelError {
    fn from(err: DiscordError) -> Self {
        match err {
            DiscordError::Network(msg) => ChannelError::ConnectionFailed(msg),
            DiscordError::Authentication(msg) => ChannelError::AuthenticationFailed(msg),
            DiscordError::RateLimited(secs) => ChannelError::RateLimited(secs),
            DiscordError::Api { .. } | DiscordError::Io(_) => {
                ChannelError::SendFailed(err.to_string())
            }
            DiscordError::Parse(msg) => ChannelError::Other(msg),
        }
    }
}

/// Discord REST client
#[derive(Debug, Clone)]
pub struct DiscordClient {
    config: DiscordConfig,
    client: reqwest::Client,
    http_url: String,
}

impl DiscordClient {
    /// Create a new Discord REST client
    pub fn new(config: DiscordConfig) -> Result<Self, DiscordError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| DiscordError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            http_url: DISCORD_API_BASE.to_string(),
        })
    }

    /// Set a custom API base URL (e.g., for testing).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn config(&self) -> &DiscordConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.http_url, endpoint))
            .header("Authorization", format!("Bot {}", self.config.bot_token))
    }

    /// Send a request and fail on non-2xx responses
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DiscordError> {
        let response = request
            .send()
            .await
            .map_err(|e| DiscordError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        match status.as_u16() {
            401 => Err(DiscordError::Authentication(body)),
            429 => Err(DiscordError::RateLimited(retry_after_secs(&body))),
            code => Err(DiscordError::Api { status: code, body }),
        }
    }

    /// Send a request to the Discord API and decode the JSON response
    async fn api_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<T, DiscordError> {
        let mut request = self.request(method, endpoint);
        if let Some(body) = body {
            request = request.json(&body);
        }

        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| DiscordError::Parse(e.to_string()))
    }

    /// Fetch the bot's own user
    pub async fn current_user(&self) -> Result<DiscordUser, DiscordError> {
        self.api_request(reqwest::Method::GET, "users/@me", None).await
    }

    /// ID of the user owning the bot application
    pub async fn application_owner_id(&self) -> Result<String, DiscordError> {
        let app: DiscordApplication = self
            .api_request(reqwest::Method::GET, "oauth2/applications/@me", None)
            .await?;
        app.owner
            .map(|owner| owner.id)
            .ok_or_else(|| DiscordError::Parse("application has no owner".to_string()))
    }

    /// Verify the bot token
    pub async fn connect(&self) -> Result<DiscordUser, DiscordError> {
        info!("Connecting to Discord...");
        let user = self.current_user().await?;
        info!(user = %user.username, "Discord connected successfully");
        Ok(user)
    }
}

#[async_trait]
impl ChatTransport for DiscordClient {
    async fn channel_info(&self, channel_id: &str) -> ChannelResult<ChannelInfo> {
        let channel: DiscordChannelResponse = self
            .api_request(reqwest::Method::GET, &format!("channels/{}", channel_id), None)
            .await?;
        Ok(ChannelInfo {
            id: channel.id,
            guild_id: channel.guild_id,
            nsfw: channel.nsfw,
        })
    }

    async fn guild_name(&self, guild_id: &str) -> ChannelResult<String> {
        let guild: DiscordGuildResponse = self
            .api_request(reqwest::Method::GET, &format!("guilds/{}", guild_id), None)
            .await?;
        Ok(guild.name)
    }

    async fn send_text(&self, channel_id: &str, message: OutgoingMessage) -> ChannelResult<String> {
        let body = message_payload(&message, None, self.config.max_message_length);
        let response: DiscordMessageResponse = self
            .api_request(
                reqwest::Method::POST,
                &format!("channels/{}/messages", channel_id),
                Some(body),
            )
            .await?;
        Ok(response.id)
    }

    async fn send_file(
        &self,
        channel_id: &str,
        message: OutgoingMessage,
        file: &Path,
        file_name: &str,
    ) -> ChannelResult<String> {
        let payload = message_payload(&message, Some(file_name), self.config.max_message_length);

        let handle = tokio::fs::File::open(file).await.map_err(DiscordError::Io)?;
        let length = handle.metadata().await.map_err(DiscordError::Io)?.len();
        debug!(channel_id = %channel_id, file = %file_name, bytes = length, "uploading attachment");

        let form = Form::new().text("payload_json", payload.to_string()).part(
            "files[0]",
            Part::stream_with_length(reqwest::Body::from(handle), length)
                .file_name(file_name.to_string()),
        );

        let request = self
            .request(reqwest::Method::POST, &format!("channels/{}/messages", channel_id))
            .multipart(form);
        let response: DiscordMessageResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| DiscordError::Parse(e.to_string()))?;
        Ok(response.id)
    }

    async fn suppress_embeds(&self, channel_id: &str, message_id: &str) -> ChannelResult<()> {
        let request = self
            .request(
                reqwest::Method::PATCH,
                &format!("channels/{}/messages/{}", channel_id, message_id),
            )
            .json(&json!({ "flags": SUPPRESS_EMBEDS_FLAG }));
        self.send(request).await?;
        Ok(())
    }

    async fn start_typing(&self, channel_id: &str) -> ChannelResult<()> {
        let request = self.request(
            reqwest::Method::POST,
            &format!("channels/{}/typing", channel_id),
        );
        self.send(request).await?;
        Ok(())
    }
}

/// JSON body for a message, with an attachment slot when `file_name` is set.
fn message_payload(message: &OutgoingMessage, file_name: Option<&str>, max_len: usize) -> Value {
    let mut body = json!({
        "content": truncate_chars(&message.content, max_len),
        "allowed_mentions": { "parse": [], "replied_user": false },
    });

    if let Some(embed) = &message.embed {
        body["embeds"] = json!([embed]);
    }
    if let Some(reply_to) = &message.reply_to {
        body["message_reference"] = json!({
            "message_id": reply_to,
            "fail_if_not_exists": false,
        });
    }
    if let Some(file_name) = file_name {
        body["attachments"] = json!([{ "id": 0, "filename": file_name }]);
    }
    body
}

/// Keep at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

fn retry_after_secs(body: &str) -> u64 {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(Value::as_f64))
        .map(|secs| secs.ceil() as u64)
        .unwrap_or(1)
}

// Discord API response types
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DiscordApplication {
    #[serde(default)]
    owner: Option<DiscordUser>,
}

#[derive(Debug, Deserialize)]
struct DiscordMessageResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DiscordChannelResponse {
    id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    nsfw: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordGuildResponse {
    name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscordEmbed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<DiscordEmbedAuthor>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fields: Vec<DiscordEmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<DiscordEmbedFooter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscordEmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscordEmbedField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscordEmbedFooter {
    pub text: String,
}
