//! pixiv web client: link extraction, the shared HTTP session, and the
//! ajax metadata endpoints.

pub mod client;
pub mod link;
pub mod models;
pub mod session;

pub use client::{MetadataClient, UpstreamError};
pub use link::{extract, scan, PostReference};
pub use models::{Frame, FrameManifest, PostMetadata, ILLUST_TYPE_UGOIRA};
pub use session::{
    HttpSession, SessionError, SessionOptions, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS,
    DEFAULT_USER_AGENT,
};
