//! Configuration loading
//!
//! Configuration is read from a JSON5 file (default
//! `<config dir>/pixiv-relay/config.json5`, overridable with
//! `PIXIV_RELAY_CONFIG`), then selected values are overridden from the
//! environment. A missing file yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channels::discord::DiscordConfig;
use crate::logging::LoggingConfig;
use crate::media::{EncoderConfig, DEFAULT_VIDEO_BITRATE};
use crate::pixiv::{SessionOptions, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};

/// Environment variable holding the config file path.
pub const CONFIG_PATH_ENV: &str = "PIXIV_RELAY_CONFIG";
/// Environment variable holding the Discord bot token.
pub const DISCORD_TOKEN_ENV: &str = "DISCORD_TOKEN";
/// Environment variable holding the pixiv session cookie.
pub const PIXIV_COOKIE_ENV: &str = "PIXIV_COOKIE";
/// Environment variable holding the owner's Discord user id.
pub const OWNER_ID_ENV: &str = "PIXIV_RELAY_OWNER_ID";

const APP_DIR: &str = "pixiv-relay";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Discord bot settings
    pub discord: DiscordConfig,
    /// pixiv session settings
    pub pixiv: PixivConfig,
    /// Download and encoder settings
    pub media: MediaConfig,
    /// Guild whitelist storage
    pub whitelist: WhitelistConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PixivConfig {
    /// Value of the `PHPSESSID` cookie
    pub session_cookie: String,
    pub base_url: String,
    pub user_agent: String,
}

impl Default for PixivConfig {
    fn default() -> Self {
        Self {
            session_cookie: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaConfig {
    /// Directory for downloads and encoder output; system temp dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,
    pub convert_path: PathBuf,
    pub video_bitrate: String,
    pub request_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            convert_path: PathBuf::from("convert"),
            video_bitrate: DEFAULT_VIDEO_BITRATE.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhitelistConfig {
    /// Whitelist JSON file; `<data dir>/pixiv-relay/whitelist.json` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(DISCORD_TOKEN_ENV) {
            self.discord.bot_token = token;
        }
        if let Some(cookie) = non_empty(PIXIV_COOKIE_ENV) {
            self.pixiv.session_cookie = cookie;
        }
        if let Some(owner) = non_empty(OWNER_ID_ENV) {
            self.discord.owner_id = Some(owner);
        }
    }

    /// Check the settings the bot cannot run without.
    pub fn validate_for_bot(&self) -> Result<(), ConfigError> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(ConfigError::Missing("discord.botToken / DISCORD_TOKEN"));
        }
        if self.pixiv.session_cookie.trim().is_empty() {
            return Err(ConfigError::Missing("pixiv.sessionCookie / PIXIV_COOKIE"));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            base_url: self.pixiv.base_url.clone(),
            user_agent: self.pixiv.user_agent.clone(),
            timeout: Duration::from_secs(self.media.request_timeout_secs.max(1)),
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            ffmpeg_path: self.media.ffmpeg_path.clone(),
            convert_path: self.media.convert_path.clone(),
            video_bitrate: self.media.video_bitrate.clone(),
        }
    }

    pub fn whitelist_path(&self) -> PathBuf {
        self.whitelist.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("whitelist.json")
        })
    }
}

/// Resolve the configuration file path.
pub fn get_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json5")
}

/// Load the configuration file and apply environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    Ok(config)
}

/// Load a configuration file without environment overrides.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    json5::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
