//! Media pipeline module
//!
//! Turns pixiv posts into files that can be attached to a chat message:
//!
//! - **MediaFetcher**: streams a remote image or archive into a temp file
//!   through the shared pixiv session
//!
//! - **FrameAnimationTranscoder**: renders ugoira frame archives to webm
//!   (ffmpeg) or gif (ImageMagick)
//!   - Encoder failures are logged, never raised
//!   - Encoder subprocesses are killed when the request is dropped
//!
//! - **MediaResolver**: classifies a post, applies the adult-content policy,
//!   and returns a single ready-to-send [`MediaArtifact`]
//!
//! - **ScopedTempResource**: owner of every temp file and directory above;
//!   deletes on release or drop, exactly once
//!
//! # Example
//!
//! ```ignore
//! use pixiv_relay::media::MediaResolver;
//!
//! let resolution = resolver.resolve("12345", 0, false, true).await?;
//! if let Some(path) = resolution.artifact.local_path() {
//!     send_attachment(path, resolution.artifact.display_name()).await;
//! }
//! resolution.artifact.release();
//! ```

pub mod fetch;
pub mod resolver;
pub mod temp;
pub mod transcode;

pub use fetch::{FetchError, MediaFetcher};
pub use resolver::{clamp_page, MediaArtifact, MediaResolver, ResolveError, Resolution};
pub use temp::{ScopedTempResource, TEMP_PREFIX};
pub use transcode::{
    concat_script, looping_image_args, video_args, EncoderConfig, FrameAnimationTranscoder,
    OutputFormat, TranscodeError, CONCAT_SCRIPT_NAME, DEFAULT_VIDEO_BITRATE,
};
