//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- run the Discord relay until Ctrl-C
//! - `resolve <text>` -- run the media pipeline once and save the result
//! - `config show|path` -- inspect configuration
//! - `whitelist list` -- print whitelisted guilds
//! - `version` -- print build/version info

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Discord relay for pixiv artwork links.
#[derive(Parser, Debug)]
#[command(
    name = "pixiv-relay",
    version = env!("CARGO_PKG_VERSION"),
    about = "Relays pixiv artwork links as images, webm and gif attachments"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay (default when no subcommand is given).
    Start,

    /// Resolve one artwork link and save its media locally.
    Resolve(ResolveArgs),

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Inspect the guild whitelist.
    #[command(subcommand)]
    Whitelist(WhitelistCommand),

    /// Print version and git commit information.
    Version,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Text containing a pixiv artwork link, or a bare post ID.
    pub text: String,

    /// Directory the artifact is copied into.
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Produce a gif instead of webm for animations.
    #[arg(long)]
    pub gif: bool,

    /// Fetch adult posts.
    #[arg(long)]
    pub allow_adult: bool,

    /// 1-indexed page, overriding any `pN` hint in the text.
    #[arg(short, long)]
    pub page: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration (secrets redacted) as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

#[derive(Subcommand, Debug)]
pub enum WhitelistCommand {
    /// List whitelisted guilds.
    List,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::channels::{DiscordClient, Gateway};
use crate::config::{self, Config};
use crate::logging;
use crate::media::{FrameAnimationTranscoder, MediaFetcher, MediaResolver, Resolution};
use crate::pixiv::{self, HttpSession, MetadataClient, PostReference, SessionError};
use crate::relay::RelayHandler;
use crate::whitelist::Whitelist;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Secrets that should be redacted when printing config.
const SECRET_KEYS: &[&str] = &["token", "cookie", "secret", "password"];

/// Gateway events buffered between the websocket and the relay.
const EVENT_BUFFER: usize = 64;

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> CliResult {
    match cli.command.unwrap_or(Command::Start) {
        Command::Start => handle_start(load_with_logging()?).await,
        Command::Resolve(args) => handle_resolve(&load_with_logging()?, args).await,
        Command::Config(ConfigCommand::Show) => handle_config_show(),
        Command::Config(ConfigCommand::Path) => {
            handle_config_path();
            Ok(())
        }
        Command::Whitelist(WhitelistCommand::List) => {
            handle_whitelist_list(&config::load_config()?)
        }
        Command::Version => {
            handle_version();
            Ok(())
        }
    }
}

fn load_with_logging() -> Result<Config, Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    logging::init_logging(&cfg.logging)?;
    Ok(cfg)
}

/// Build the media pipeline from configuration.
pub fn build_resolver(cfg: &Config) -> Result<MediaResolver, SessionError> {
    let session = HttpSession::new(&cfg.pixiv.session_cookie, cfg.session_options())?;
    let mut fetcher = MediaFetcher::new(session.clone());
    let mut transcoder = FrameAnimationTranscoder::new(cfg.encoder_config());
    if let Some(dir) = &cfg.media.temp_dir {
        fetcher = fetcher.with_temp_dir(dir.clone());
        transcoder = transcoder.with_temp_dir(dir.clone());
    }
    Ok(MediaResolver::new(
        MetadataClient::new(session),
        fetcher,
        transcoder,
    ))
}

/// Run the `start` subcommand.
pub async fn handle_start(cfg: Config) -> CliResult {
    cfg.validate_for_bot()?;

    let resolver = build_resolver(&cfg)?;
    let whitelist = Arc::new(Whitelist::load(cfg.whitelist_path())?);
    let discord = Arc::new(DiscordClient::new(cfg.discord.clone())?);
    discord.connect().await?;

    let owner_id = match cfg.discord.owner_id.clone() {
        Some(id) => Some(id),
        None => match discord.application_owner_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "could not determine the bot owner; whitelist commands disabled");
                None
            }
        },
    };

    let relay = Arc::new(RelayHandler::new(
        discord,
        resolver,
        whitelist,
        owner_id,
        cfg.discord.command_prefix.clone(),
    ));
    let gateway = Gateway::new(cfg.discord.bot_token.clone(), cfg.discord.intents.bits());

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay_task = tokio::spawn(relay.run(events_rx));
    let mut gateway_task =
        tokio::spawn(async move { gateway.run(events_tx, shutdown_rx).await });
    info!(whitelist = %cfg.whitelist_path().display(), "pixiv-relay started");

    let gateway_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
            let _ = shutdown_tx.send(true);
            gateway_task.await?
        }
        joined = &mut gateway_task => joined?,
    };

    // The gateway dropped its sender; the relay finishes in-flight messages.
    relay_task.await?;
    gateway_result?;
    Ok(())
}

/// Run the `resolve` subcommand.
pub async fn handle_resolve(cfg: &Config, args: ResolveArgs) -> CliResult {
    let reference = reference_from_text(&args.text)
        .ok_or_else(|| format!("no pixiv artwork link in {:?}", args.text))?;

    let resolver = build_resolver(cfg)?;
    let Resolution { metadata, artifact } = resolver
        .resolve(
            &reference.post_id,
            args.page.unwrap_or(reference.page_hint),
            args.gif || reference.wants_alt_format,
            args.allow_adult,
        )
        .await?;

    println!("{}", metadata.title);
    println!("  Post:    {}", metadata.post_url());
    println!("  Author:  {} ({})", metadata.author_name, metadata.author_url);
    println!("  Pages:   {}", metadata.page_count);
    println!("  Adult:   {}", metadata.is_adult_content);

    let (Some(path), Some(name)) = (artifact.local_path(), artifact.display_name()) else {
        return Err("adult post not fetched; pass --allow-adult".into());
    };

    tokio::fs::create_dir_all(&args.out).await?;
    let dest = args.out.join(name);
    tokio::fs::copy(path, &dest).await?;
    artifact.release()?;

    println!("  Saved:   {}", dest.display());
    Ok(())
}

/// Run the `config show` subcommand.
pub fn handle_config_show() -> CliResult {
    let cfg = config::load_config()?;
    let redacted = redact_secrets(serde_json::to_value(&cfg)?);
    let pretty = serde_json::to_string_pretty(&redacted)?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path() {
    println!("{}", config::get_config_path().display());
}

/// Run the `whitelist list` subcommand.
pub fn handle_whitelist_list(cfg: &Config) -> CliResult {
    let whitelist = Whitelist::load(cfg.whitelist_path())?;
    let entries = whitelist.entries();
    if entries.is_empty() {
        println!("No whitelisted guilds ({})", whitelist.path().display());
    }
    for (id, name) in entries {
        println!("{}  {}", id, name);
    }
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("pixiv-relay {}", env!("CARGO_PKG_VERSION"));
    println!("  Git commit: {}", env!("PIXIV_RELAY_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Find a post reference in `text`, accepting a bare numeric post ID.
fn reference_from_text(text: &str) -> Option<PostReference> {
    if let Some(reference) = pixiv::extract(text) {
        return Some(reference);
    }
    let trimmed = text.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Some(PostReference {
            post_id: trimmed.to_string(),
            page_hint: 0,
            wants_alt_format: false,
            suppressed: false,
        });
    }
    None
}

/// Redact known secret keys in a JSON value (recursive).
fn redact_secrets(mut value: Value) -> Value {
    match &mut value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let lower = key.to_lowercase();
                if SECRET_KEYS.iter().any(|s| lower.contains(s)) {
                    map.insert(key, Value::String("[REDACTED]".to_string()));
                } else if let Some(child) = map.remove(&key) {
                    map.insert(key, redact_secrets(child));
                }
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                *item = redact_secrets(item.take());
            }
        }
        _ => {}
    }
    value
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_no_args_defaults_to_none() {
        let cli = Cli::try_parse_from(["pixiv-relay"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_start_subcommand() {
        let cli = Cli::try_parse_from(["pixiv-relay", "start"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Start)));
    }

    #[test]
    fn test_cli_version_subcommand() {
        let cli = Cli::try_parse_from(["pixiv-relay", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
    }

    #[test]
    fn test_cli_resolve_defaults() {
        let cli = Cli::try_parse_from(["pixiv-relay", "resolve", "12345"]).unwrap();
        match cli.command {
            Some(Command::Resolve(args)) => {
                assert_eq!(args.text, "12345");
                assert_eq!(args.out, PathBuf::from("."));
                assert!(!args.gif);
                assert!(!args.allow_adult);
                assert_eq!(args.page, None);
            }
            other => panic!("Expected Resolve, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_resolve_flags() {
        let cli = Cli::try_parse_from([
            "pixiv-relay",
            "resolve",
            "https://www.pixiv.net/artworks/1",
            "--out",
            "/tmp/media",
            "--gif",
            "--allow-adult",
            "--page",
            "3",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Resolve(args)) => {
                assert_eq!(args.out, PathBuf::from("/tmp/media"));
                assert!(args.gif);
                assert!(args.allow_adult);
                assert_eq!(args.page, Some(3));
            }
            other => panic!("Expected Resolve, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_resolve_requires_text() {
        assert!(Cli::try_parse_from(["pixiv-relay", "resolve"]).is_err());
    }

    #[test]
    fn test_cli_config_show() {
        let cli = Cli::try_parse_from(["pixiv-relay", "config", "show"]).unwrap();
        match cli.command {
            Some(Command::Config(ConfigCommand::Show)) => {}
            other => panic!("Expected Config(Show), got {:?}", other),
        }
    }

    #[test]
    fn test_cli_config_path() {
        let cli = Cli::try_parse_from(["pixiv-relay", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Path))
        ));
    }

    #[test]
    fn test_cli_whitelist_list() {
        let cli = Cli::try_parse_from(["pixiv-relay", "whitelist", "list"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Whitelist(WhitelistCommand::List))
        ));
    }

    #[test]
    fn test_reference_from_text() {
        let reference = reference_from_text("look https://www.pixiv.net/artworks/42 p2").unwrap();
        assert_eq!(reference.post_id, "42");
        assert_eq!(reference.page_hint, 2);

        let bare = reference_from_text(" 12345 ").unwrap();
        assert_eq!(bare.post_id, "12345");
        assert_eq!(bare.page_hint, 0);

        assert!(reference_from_text("no link here").is_none());
        assert!(reference_from_text("").is_none());
    }

    #[test]
    fn test_redact_secrets() {
        let val = serde_json::json!({
            "discord": {
                "botToken": "abc.def",
                "commandPrefix": "!pixiv"
            },
            "pixiv": {
                "sessionCookie": "123_abc"
            },
            "safe": "visible"
        });
        let redacted = redact_secrets(val);
        assert_eq!(redacted["discord"]["botToken"], "[REDACTED]");
        assert_eq!(redacted["pixiv"]["sessionCookie"], "[REDACTED]");
        assert_eq!(redacted["discord"]["commandPrefix"], "!pixiv");
        assert_eq!(redacted["safe"], "visible");
    }

    #[test]
    fn test_redact_secrets_array() {
        let val = serde_json::json!([{"password": "secret"}, {"safe": "ok"}]);
        let redacted = redact_secrets(val);
        assert_eq!(redacted[0]["password"], "[REDACTED]");
        assert_eq!(redacted[1]["safe"], "ok");
    }

    #[test]
    fn test_build_resolver_with_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.media.temp_dir = Some(dir.path().to_path_buf());
        assert!(build_resolver(&cfg).is_ok());
    }
}
