//! pixiv ajax metadata client.
//!
//! Each call is a single request with no retry: any non-2xx status, an
//! `error: true` envelope, or a body missing required fields aborts the
//! current resolution with [`UpstreamError`].

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::models::{ApiEnvelope, FrameManifest, IllustBody, PageEntry, PostMetadata, UgoiraBody};
use super::session::HttpSession;

/// Longest error body kept in an [`UpstreamError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("invalid post id: {0:?}")]
    InvalidPostId(String),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream reported an error: {0}")]
    Api(String),

    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

/// Fetches post metadata, page lists, and animation manifests.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    session: HttpSession,
}

impl MetadataClient {
    pub fn new(session: HttpSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &HttpSession {
        &self.session
    }

    /// `GET /ajax/illust/{post_id}`
    pub async fn fetch_metadata(&self, post_id: &str) -> Result<PostMetadata, UpstreamError> {
        validate_post_id(post_id)?;
        let body: IllustBody = self.get_body(&format!("ajax/illust/{post_id}")).await?;
        PostMetadata::from_api(post_id, body)
    }

    /// `GET /ajax/illust/{post_id}/ugoira_meta`
    pub async fn fetch_frame_manifest(
        &self,
        post_id: &str,
    ) -> Result<FrameManifest, UpstreamError> {
        validate_post_id(post_id)?;
        let body: UgoiraBody = self
            .get_body(&format!("ajax/illust/{post_id}/ugoira_meta"))
            .await?;
        FrameManifest::from_api(post_id, body)
    }

    /// `GET /ajax/illust/{post_id}/pages`, returning the display-size URL
    /// of every page in order.
    pub async fn fetch_pages(&self, post_id: &str) -> Result<Vec<String>, UpstreamError> {
        validate_post_id(post_id)?;
        let pages: Vec<PageEntry> = self
            .get_body(&format!("ajax/illust/{post_id}/pages"))
            .await?;
        pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| {
                page.urls.regular.ok_or_else(|| {
                    UpstreamError::Malformed(format!(
                        "post {post_id} page {} has no image url",
                        index + 1
                    ))
                })
            })
            .collect()
    }

    async fn get_body<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let url = self.session.endpoint(path);
        debug!(url = %url, "requesting pixiv api");

        let response = self
            .session
            .client()
            .get(&url)
            .send()
            .await
            .map_err(UpstreamError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".to_string());
            truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(format!("invalid JSON: {e}")))?;
        if envelope.error {
            return Err(UpstreamError::Api(envelope.message));
        }

        let body = envelope
            .body
            .ok_or_else(|| UpstreamError::Malformed(format!("{path}: missing body")))?;
        serde_json::from_value(body).map_err(|e| UpstreamError::Malformed(format!("{path}: {e}")))
    }
}

fn validate_post_id(post_id: &str) -> Result<(), UpstreamError> {
    if post_id.is_empty() || !post_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UpstreamError::InvalidPostId(post_id.to_string()));
    }
    Ok(())
}

fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
