//! Post resolution: metadata, adult-content policy, and artifact production.

use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use super::fetch::{FetchError, MediaFetcher};
use super::temp::ScopedTempResource;
use super::transcode::{FrameAnimationTranscoder, OutputFormat, TranscodeError};
use crate::pixiv::{MetadataClient, PostMetadata, UpstreamError};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Download(#[from] FetchError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

/// The single file produced for a post, ready to be attached.
///
/// An artifact without a local path means nothing was fetched because the
/// viewer may not see the post; callers must check before sending.
#[derive(Debug)]
pub struct MediaArtifact {
    resource: Option<ScopedTempResource>,
    display_name: Option<String>,
    /// 1-indexed page that was fetched.
    pub page: u32,
    pub page_count: u32,
    pub is_adult_content: bool,
}

impl MediaArtifact {
    fn blocked(metadata: &PostMetadata) -> Self {
        Self {
            resource: None,
            display_name: None,
            page: 0,
            page_count: metadata.page_count,
            is_adult_content: metadata.is_adult_content,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(page: u32, page_count: u32, is_adult_content: bool) -> Self {
        Self {
            resource: None,
            display_name: None,
            page,
            page_count,
            is_adult_content,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.resource.as_ref().map(ScopedTempResource::path)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.resource.is_none()
    }

    /// Delete the backing file. Dropping the artifact has the same effect
    /// but swallows errors.
    pub fn release(self) -> io::Result<()> {
        match self.resource {
            Some(resource) => resource.release(),
            None => Ok(()),
        }
    }
}

/// Metadata plus the artifact produced for it.
#[derive(Debug)]
pub struct Resolution {
    pub metadata: PostMetadata,
    pub artifact: MediaArtifact,
}

/// Orchestrates metadata lookup, download, and transcoding for one post.
///
/// Holds no per-request state, so one resolver serves concurrent requests.
#[derive(Debug, Clone)]
pub struct MediaResolver {
    client: MetadataClient,
    fetcher: MediaFetcher,
    transcoder: FrameAnimationTranscoder,
}

impl MediaResolver {
    pub fn new(
        client: MetadataClient,
        fetcher: MediaFetcher,
        transcoder: FrameAnimationTranscoder,
    ) -> Self {
        Self {
            client,
            fetcher,
            transcoder,
        }
    }

    pub fn client(&self) -> &MetadataClient {
        &self.client
    }

    /// Resolve `post_id` into a sendable artifact.
    ///
    /// `page_hint` is 1-indexed, 0 meaning unspecified. `wants_alt_format`
    /// selects gif over webm for animations. Adult posts are only fetched
    /// when `viewer_allows_adult` is set; otherwise the artifact is empty.
    pub async fn resolve(
        &self,
        post_id: &str,
        page_hint: u32,
        wants_alt_format: bool,
        viewer_allows_adult: bool,
    ) -> Result<Resolution, ResolveError> {
        let metadata = self.client.fetch_metadata(post_id).await?;

        if metadata.is_adult_content && !viewer_allows_adult {
            debug!(post_id = %post_id, "adult post blocked for this viewer");
            return Ok(Resolution {
                artifact: MediaArtifact::blocked(&metadata),
                metadata,
            });
        }

        let artifact = if metadata.is_frame_animation {
            self.resolve_animation(&metadata, wants_alt_format).await?
        } else {
            self.resolve_static(&metadata, page_hint).await?
        };

        info!(
            post_id = %post_id,
            page = artifact.page,
            page_count = artifact.page_count,
            name = artifact.display_name().unwrap_or_default(),
            "post resolved"
        );
        Ok(Resolution { metadata, artifact })
    }

    async fn resolve_animation(
        &self,
        metadata: &PostMetadata,
        wants_alt_format: bool,
    ) -> Result<MediaArtifact, ResolveError> {
        let manifest = self.client.fetch_frame_manifest(&metadata.post_id).await?;
        let archive = self.fetcher.download(&manifest.archive_url).await?;

        let format = if wants_alt_format {
            OutputFormat::LoopingImage
        } else {
            OutputFormat::Video
        };
        let output = self.transcoder.transcode(&manifest, archive, format).await?;

        Ok(MediaArtifact {
            resource: Some(output),
            display_name: Some(format!("{}.{}", metadata.post_id, format.extension())),
            page: 1,
            page_count: 1,
            is_adult_content: metadata.is_adult_content,
        })
    }

    async fn resolve_static(
        &self,
        metadata: &PostMetadata,
        page_hint: u32,
    ) -> Result<MediaArtifact, ResolveError> {
        let page = clamp_page(page_hint, metadata.page_count);
        let image_url = self.page_url(metadata, page).await?;
        let resource = self.fetcher.download(&image_url).await?;

        Ok(MediaArtifact {
            resource: Some(resource),
            display_name: Some(display_name_for(&image_url, &metadata.post_id)),
            page,
            page_count: metadata.page_count,
            is_adult_content: metadata.is_adult_content,
        })
    }

    async fn page_url(&self, metadata: &PostMetadata, page: u32) -> Result<String, UpstreamError> {
        if page == 1 {
            return metadata.image_url.clone().ok_or_else(|| {
                UpstreamError::Malformed(format!(
                    "post {} has no display image url",
                    metadata.post_id
                ))
            });
        }

        let pages = self.client.fetch_pages(&metadata.post_id).await?;
        let index = page.saturating_sub(1) as usize;
        pages.into_iter().nth(index).ok_or_else(|| {
            UpstreamError::Malformed(format!(
                "post {} has no page {}",
                metadata.post_id, page
            ))
        })
    }
}

/// Clamp a 1-indexed page hint into `[1, page_count]`; 0 selects page 1.
pub fn clamp_page(page_hint: u32, page_count: u32) -> u32 {
    if page_hint == 0 {
        return 1;
    }
    page_hint.clamp(1, page_count.max(1))
}

/// Attachment name for a static image: the last path segment of its URL.
fn display_name_for(image_url: &str, post_id: &str) -> String {
    url::Url::parse(image_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("{post_id}.jpg"))
}
