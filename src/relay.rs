//! Relay handler
//!
//! Turns chat messages carrying a pixiv link into a reply with the post's
//! media attached, and handles the owner's whitelist commands.

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

use crate::channels::discord::{
    truncate_chars, DiscordEmbed, DiscordEmbedAuthor, DiscordEmbedFooter,
};
use crate::channels::{ChatTransport, GatewayEvent, IncomingMessage, OutgoingMessage};
use crate::logging::message_span;
use crate::media::{MediaArtifact, MediaResolver};
use crate::pixiv::{self, PostMetadata};
use crate::whitelist::Whitelist;

/// Characters of post description kept in the embed.
const DESCRIPTION_LIMIT: usize = 300;
const EMBED_COLOR: u32 = 0x0096fa;
const ADULT_FOOTER: &str = "R-18";
const SPOILER_PREFIX: &str = "SPOILER_";

static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// How a message was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Sent by a bot, or a command from someone other than the owner
    Ignored,
    CommandHandled,
    NotWhitelisted,
    NoReference,
    /// Adult post in a channel that may not show it
    Blocked,
    Sent,
    Failed,
}

/// Owner commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerCommand {
    Enable,
    Disable,
}

/// Parse `<prefix> enable` / `<prefix> disable`.
pub fn parse_command(prefix: &str, content: &str) -> Option<OwnerCommand> {
    let rest = content.trim().strip_prefix(prefix)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut words = rest.split_whitespace();
    let command = match words.next()? {
        word if word.eq_ignore_ascii_case("enable") => OwnerCommand::Enable,
        word if word.eq_ignore_ascii_case("disable") => OwnerCommand::Disable,
        _ => return None,
    };
    words.next().is_none().then_some(command)
}

pub struct RelayHandler<T: ChatTransport> {
    transport: Arc<T>,
    resolver: MediaResolver,
    whitelist: Arc<Whitelist>,
    owner_id: Option<String>,
    command_prefix: String,
    bot_user_id: RwLock<Option<String>>,
}

impl<T: ChatTransport + 'static> RelayHandler<T> {
    pub fn new(
        transport: Arc<T>,
        resolver: MediaResolver,
        whitelist: Arc<Whitelist>,
        owner_id: Option<String>,
        command_prefix: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            resolver,
            whitelist,
            owner_id,
            command_prefix: command_prefix.into(),
            bot_user_id: RwLock::new(None),
        }
    }

    /// Consume gateway events until the sender closes, handling each message
    /// in its own task. Waits for in-flight messages before returning.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<GatewayEvent>) {
        let mut tasks = JoinSet::new();

        while let Some(event) = events.recv().await {
            while tasks.try_join_next().is_some() {}

            match event {
                GatewayEvent::Ready { user_id } => {
                    info!(user_id = %user_id, "relay ready");
                    *self.bot_user_id.write() = Some(user_id);
                }
                GatewayEvent::MessageCreate(message) => {
                    let handler = Arc::clone(&self);
                    tasks.spawn(async move {
                        handler.handle_message(&message).await;
                    });
                }
            }
        }

        while tasks.join_next().await.is_some() {}
    }

    pub async fn handle_message(&self, message: &IncomingMessage) -> RelayOutcome {
        if message.author_is_bot
            || self.bot_user_id.read().as_deref() == Some(message.author_id.as_str())
        {
            return RelayOutcome::Ignored;
        }

        if let Some(command) = parse_command(&self.command_prefix, &message.content) {
            return self.handle_command(message, command).await;
        }

        if let Some(guild_id) = &message.guild_id {
            if !self.whitelist.contains(guild_id) {
                return RelayOutcome::NotWhitelisted;
            }
        }

        let Some(reference) = pixiv::extract(&message.content) else {
            return RelayOutcome::NoReference;
        };

        let span = message_span(&message.channel_id, &message.id, &reference.post_id);
        self.relay_post(message, reference).instrument(span).await
    }

    async fn relay_post(
        &self,
        message: &IncomingMessage,
        reference: pixiv::PostReference,
    ) -> RelayOutcome {
        let allows_adult = match &message.guild_id {
            Some(_) => match self.transport.channel_info(&message.channel_id).await {
                Ok(channel) => channel.nsfw,
                Err(e) => {
                    warn!(error = %e, "channel lookup failed");
                    return RelayOutcome::Failed;
                }
            },
            None => false,
        };

        if let Err(e) = self.transport.start_typing(&message.channel_id).await {
            debug!(error = %e, "typing indicator failed");
        }

        let resolution = match self
            .resolver
            .resolve(
                &reference.post_id,
                reference.page_hint,
                reference.wants_alt_format,
                allows_adult,
            )
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(error = %e, "failed to resolve post");
                return RelayOutcome::Failed;
            }
        };

        let metadata = resolution.metadata;
        let artifact = resolution.artifact;
        let (Some(path), Some(display_name)) = (artifact.local_path(), artifact.display_name())
        else {
            info!("adult post not shown in this channel");
            return RelayOutcome::Blocked;
        };

        let reply = build_reply(&metadata, &artifact).replying_to(&message.id);
        let file_name = attachment_name(display_name, artifact.is_adult_content);
        let sent = self
            .transport
            .send_file(&message.channel_id, reply, path, &file_name)
            .await;

        if let Err(e) = artifact.release() {
            warn!(error = %e, "failed to delete artifact");
        }

        match sent {
            Ok(reply_id) => {
                info!(reply_id = %reply_id, file = %file_name, "post relayed");
                if let Err(e) = self
                    .transport
                    .suppress_embeds(&message.channel_id, &message.id)
                    .await
                {
                    debug!(error = %e, "could not suppress embeds");
                }
                RelayOutcome::Sent
            }
            Err(e) => {
                warn!(error = %e, "failed to send reply");
                RelayOutcome::Failed
            }
        }
    }

    async fn handle_command(&self, message: &IncomingMessage, command: OwnerCommand) -> RelayOutcome {
        if self.owner_id.as_deref() != Some(message.author_id.as_str()) {
            return RelayOutcome::Ignored;
        }

        let reply = match (&message.guild_id, command) {
            (None, _) => "Whitelist commands only work in a server.".to_string(),
            (Some(guild_id), OwnerCommand::Enable) => {
                let name = match self.transport.guild_name(guild_id).await {
                    Ok(name) => name,
                    Err(e) => {
                        debug!(error = %e, "guild lookup failed");
                        guild_id.clone()
                    }
                };
                match self.whitelist.enable(guild_id, &name).await {
                    Ok(true) => format!("Enabled for {}.", name),
                    Ok(false) => format!("Already enabled for {}.", name),
                    Err(e) => {
                        warn!(error = %e, "failed to update whitelist");
                        "Could not update the whitelist.".to_string()
                    }
                }
            }
            (Some(guild_id), OwnerCommand::Disable) => match self.whitelist.disable(guild_id).await {
                Ok(true) => "Disabled for this server.".to_string(),
                Ok(false) => "Not enabled for this server.".to_string(),
                Err(e) => {
                    warn!(error = %e, "failed to update whitelist");
                    "Could not update the whitelist.".to_string()
                }
            },
        };

        let ack = OutgoingMessage::text(reply).replying_to(&message.id);
        if let Err(e) = self.transport.send_text(&message.channel_id, ack).await {
            warn!(error = %e, "failed to acknowledge command");
        }
        RelayOutcome::CommandHandled
    }
}

/// Reply text and embed for a resolved post.
pub fn build_reply(metadata: &PostMetadata, artifact: &MediaArtifact) -> OutgoingMessage {
    let content = if metadata.page_count > 1 {
        format!("{}/{}", artifact.page, metadata.page_count)
    } else {
        String::new()
    };

    let description = strip_html(&metadata.description_html);
    let description = if description.chars().count() > DESCRIPTION_LIMIT {
        format!("{}\u{2026}", truncate_chars(&description, DESCRIPTION_LIMIT))
    } else {
        description
    };

    let embed = DiscordEmbed {
        title: Some(metadata.title.clone()),
        url: Some(metadata.post_url()),
        description: (!description.is_empty()).then_some(description),
        author: Some(DiscordEmbedAuthor {
            name: metadata.author_name.clone(),
            url: Some(metadata.author_url.clone()),
        }),
        color: Some(EMBED_COLOR),
        footer: metadata.is_adult_content.then(|| DiscordEmbedFooter {
            text: ADULT_FOOTER.to_string(),
        }),
        ..Default::default()
    };

    OutgoingMessage {
        content,
        embed: Some(embed),
        reply_to: None,
    }
}

/// Attachment file name; adult media is sent behind a spoiler.
pub fn attachment_name(display_name: &str, is_adult_content: bool) -> String {
    if is_adult_content {
        format!("{}{}", SPOILER_PREFIX, display_name)
    } else {
        display_name.to_string()
    }
}

/// Plain text of a post description.
pub fn strip_html(html: &str) -> String {
    let text = BREAK_RE.replace_all(html, "\n");
    let text = TAG_RE.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelError, ChannelInfo, ChannelResult};
    use crate::media::{FrameAnimationTranscoder, MediaFetcher};
    use crate::pixiv::{HttpSession, MetadataClient, SessionOptions};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTransport {
        nsfw: bool,
        texts: Mutex<Vec<(String, OutgoingMessage)>>,
        typing: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn channel_info(&self, channel_id: &str) -> ChannelResult<ChannelInfo> {
            Ok(ChannelInfo {
                id: channel_id.to_string(),
                guild_id: Some("g1".to_string()),
                nsfw: self.nsfw,
            })
        }

        async fn guild_name(&self, _guild_id: &str) -> ChannelResult<String> {
            Ok("Art Club".to_string())
        }

        async fn send_text(&self, channel_id: &str, message: OutgoingMessage) -> ChannelResult<String> {
            self.texts.lock().push((channel_id.to_string(), message));
            Ok("reply".to_string())
        }

        async fn send_file(
            &self,
            _channel_id: &str,
            _message: OutgoingMessage,
            _file: &Path,
            _file_name: &str,
        ) -> ChannelResult<String> {
            Err(ChannelError::SendFailed("not used".to_string()))
        }

        async fn suppress_embeds(&self, _channel_id: &str, _message_id: &str) -> ChannelResult<()> {
            Ok(())
        }

        async fn start_typing(&self, channel_id: &str) -> ChannelResult<()> {
            self.typing.lock().push(channel_id.to_string());
            Ok(())
        }
    }

    fn unreachable_resolver() -> MediaResolver {
        let session = HttpSession::new(
            "",
            SessionOptions {
                base_url: "http://127.0.0.1:9".to_string(),
                timeout: Duration::from_secs(2),
                ..Default::default()
            },
        )
        .unwrap();
        MediaResolver::new(
            MetadataClient::new(session.clone()),
            MediaFetcher::new(session),
            FrameAnimationTranscoder::default(),
        )
    }

    fn handler(dir: &Path) -> RelayHandler<FakeTransport> {
        let whitelist = Whitelist::load(dir.join("whitelist.json")).unwrap();
        RelayHandler::new(
            Arc::new(FakeTransport::default()),
            unreachable_resolver(),
            Arc::new(whitelist),
            Some("owner".to_string()),
            "!pixiv",
        )
    }

    fn message(author: &str, guild: Option<&str>, content: &str) -> IncomingMessage {
        IncomingMessage {
            id: "m1".to_string(),
            channel_id: "c1".to_string(),
            guild_id: guild.map(String::from),
            author_id: author.to_string(),
            author_name: author.to_string(),
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    fn metadata(page_count: u32, adult: bool) -> PostMetadata {
        PostMetadata {
            post_id: "12345".to_string(),
            title: "Sunset".to_string(),
            author_name: "alice".to_string(),
            author_id: "7".to_string(),
            author_url: "https://www.pixiv.net/users/7".to_string(),
            page_count,
            is_adult_content: adult,
            is_frame_animation: false,
            description_html: "Evening <b>sky</b><br />over &amp; out".to_string(),
            image_url: None,
        }
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("!pixiv", "!pixiv enable"), Some(OwnerCommand::Enable));
        assert_eq!(parse_command("!pixiv", "  !pixiv DISABLE "), Some(OwnerCommand::Disable));
        assert_eq!(parse_command("!pixiv", "!pixivenable"), None);
        assert_eq!(parse_command("!pixiv", "!pixiv enable now"), None);
        assert_eq!(parse_command("!pixiv", "!pixiv"), None);
        assert_eq!(parse_command("!pixiv", "hello"), None);
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("Evening <b>sky</b><br />over &amp; out"),
            "Evening sky\nover & out"
        );
        assert_eq!(strip_html("<a href=\"x\">&lt;3</a>"), "<3");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn test_attachment_name() {
        assert_eq!(attachment_name("1_p0.jpg", false), "1_p0.jpg");
        assert_eq!(attachment_name("1.gif", true), "SPOILER_1.gif");
    }

    #[test]
    fn test_build_reply_single_page() {
        let artifact = MediaArtifact::for_tests(1, 1, false);
        let reply = build_reply(&metadata(1, false), &artifact);
        assert_eq!(reply.content, "");

        let embed = reply.embed.unwrap();
        assert_eq!(embed.title.as_deref(), Some("Sunset"));
        assert_eq!(embed.url.as_deref(), Some("https://www.pixiv.net/artworks/12345"));
        assert_eq!(embed.description.as_deref(), Some("Evening sky\nover & out"));
        assert_eq!(embed.author.unwrap().name, "alice");
        assert!(embed.footer.is_none());
    }

    #[test]
    fn test_build_reply_multi_page_adult() {
        let artifact = MediaArtifact::for_tests(2, 3, true);
        let mut post = metadata(3, true);
        post.description_html = "x".repeat(DESCRIPTION_LIMIT + 10);

        let reply = build_reply(&post, &artifact);
        assert_eq!(reply.content, "2/3");

        let embed = reply.embed.unwrap();
        assert_eq!(embed.footer.unwrap().text, ADULT_FOOTER);
        assert_eq!(
            embed.description.unwrap().chars().count(),
            DESCRIPTION_LIMIT + 1
        );
    }

    #[tokio::test]
    async fn test_bot_authors_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let relay = handler(dir.path());
        let mut msg = message("u1", None, "https://www.pixiv.net/artworks/1");
        msg.author_is_bot = true;
        assert_eq!(relay.handle_message(&msg).await, RelayOutcome::Ignored);

        *relay.bot_user_id.write() = Some("self".to_string());
        let own = message("self", None, "https://www.pixiv.net/artworks/1");
        assert_eq!(relay.handle_message(&own).await, RelayOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_non_whitelisted_guild_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let relay = handler(dir.path());
        let msg = message("u1", Some("g1"), "https://www.pixiv.net/artworks/1");
        assert_eq!(relay.handle_message(&msg).await, RelayOutcome::NotWhitelisted);
        assert!(relay.transport.typing.lock().is_empty());
    }

    #[tokio::test]
    async fn test_owner_enables_guild() {
        let dir = tempfile::tempdir().unwrap();
        let relay = handler(dir.path());

        let stranger = message("u1", Some("g1"), "!pixiv enable");
        assert_eq!(relay.handle_message(&stranger).await, RelayOutcome::Ignored);
        assert!(!relay.whitelist.contains("g1"));

        let owner = message("owner", Some("g1"), "!pixiv enable");
        assert_eq!(relay.handle_message(&owner).await, RelayOutcome::CommandHandled);
        assert!(relay.whitelist.contains("g1"));
        assert_eq!(relay.whitelist.entries()[0].1, "Art Club");

        let texts = relay.transport.texts.lock();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].1.content, "Enabled for Art Club.");
        assert_eq!(texts[0].1.reply_to.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_owner_disables_guild() {
        let dir = tempfile::tempdir().unwrap();
        let relay = handler(dir.path());
        relay.whitelist.enable("g1", "Art Club").await.unwrap();

        let owner = message("owner", Some("g1"), "!pixiv disable");
        assert_eq!(relay.handle_message(&owner).await, RelayOutcome::CommandHandled);
        assert!(!relay.whitelist.contains("g1"));
    }

    #[tokio::test]
    async fn test_message_without_link() {
        let dir = tempfile::tempdir().unwrap();
        let relay = handler(dir.path());
        let msg = message("u1", None, "just chatting");
        assert_eq!(relay.handle_message(&msg).await, RelayOutcome::NoReference);
    }

    #[tokio::test]
    async fn test_resolution_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let relay = handler(dir.path());
        let msg = message("u1", None, "https://www.pixiv.net/artworks/1");
        assert_eq!(relay.handle_message(&msg).await, RelayOutcome::Failed);
        assert_eq!(relay.transport.typing.lock().as_slice(), ["c1".to_string()]);
        assert!(relay.transport.texts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_events() {
        let dir = tempfile::tempdir().unwrap();
        let relay = Arc::new(handler(dir.path()));
        let (tx, rx) = mpsc::channel(4);

        tx.send(GatewayEvent::Ready { user_id: "self".into() }).await.unwrap();
        tx.send(GatewayEvent::MessageCreate(message("owner", Some("g1"), "!pixiv enable")))
            .await
            .unwrap();
        drop(tx);

        Arc::clone(&relay).run(rx).await;
        assert_eq!(relay.bot_user_id.read().as_deref(), Some("self"));
        assert!(relay.whitelist.contains("g1"));
    }
}
