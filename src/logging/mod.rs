//! Structured logging
//!
//! Installs the global `tracing` subscriber (writing to stderr, so CLI
//! output on stdout stays clean) and provides the span used for each
//! relayed message.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Logging error types
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Initialization error: {0}")]
    InitError(String),
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Service name
    pub service_name: String,
    /// Log level or filter directive; `RUST_LOG` takes precedence
    pub log_level: String,
    /// Output format
    pub export_format: ExportFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "pixiv-relay".to_string(),
            log_level: "info".to_string(),
            export_format: ExportFormat::Text,
        }
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// JSON format (structured logging)
    Json,
    /// Plain text format
    #[default]
    Text,
}

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Initialize logging with the given configuration
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    if !config.enabled {
        return Ok(());
    }

    let filter = env_filter(config);

    let result = match config.export_format {
        ExportFormat::Json => Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        ExportFormat::Text => Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| LoggingError::InitError(e.to_string()))?;

    info!("Logging initialized for service: {}", config.service_name);
    Ok(())
}

/// Span covering the handling of one chat message.
pub fn message_span(channel_id: &str, message_id: &str, post_id: &str) -> tracing::Span {
    tracing::info_span!(
        "relay_message",
        messaging.destination = %channel_id,
        messaging.message_id = %message_id,
        pixiv.post_id = %post_id,
    )
}
