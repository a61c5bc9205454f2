//! Streaming media download into scoped temp files.

use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::temp::ScopedTempResource;
use crate::pixiv::HttpSession;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("download request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("download of {url} returned {status}")]
    Status { status: u16, url: String },

    #[error("download interrupted: {0}")]
    Stream(#[source] reqwest::Error),

    #[error("I/O error while saving download: {0}")]
    Io(#[from] io::Error),
}

/// Downloads single remote resources through the shared session.
#[derive(Debug, Clone)]
pub struct MediaFetcher {
    session: HttpSession,
    temp_dir: Option<PathBuf>,
}

impl MediaFetcher {
    pub fn new(session: HttpSession) -> Self {
        Self {
            session,
            temp_dir: None,
        }
    }

    /// Place downloads under `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }

    /// Stream `url` into a fresh temp file.
    ///
    /// The temp file is owned by the returned guard from the moment it is
    /// created, so an error while streaming leaves nothing behind.
    pub async fn download(&self, url: &str) -> Result<ScopedTempResource, FetchError> {
        debug!(url = %url, "downloading media");

        let response = self
            .session
            .client()
            .get(url)
            .send()
            .await
            .map_err(FetchError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let (resource, file) = ScopedTempResource::file_in(self.temp_dir.as_deref())?;
        let mut file = tokio::fs::File::from_std(file);
        let mut written: u64 = 0;

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(FetchError::Stream)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(url = %url, bytes = written, path = %resource.path().display(), "media downloaded");
        Ok(resource)
    }
}
