//! pixiv web API payloads and the validated records built from them.

use serde::Deserialize;
use serde_json::Value;

use super::client::UpstreamError;
use crate::media::CONCAT_SCRIPT_NAME;

/// `illustType` value for frame animations (ugoira).
pub const ILLUST_TYPE_UGOIRA: u8 = 2;

/// Common `{ error, message, body }` envelope of every ajax endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IllustBody {
    pub title: String,
    pub user_name: String,
    pub user_id: String,
    pub page_count: u32,
    pub x_restrict: u8,
    pub illust_type: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub urls: ImageUrls,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ImageUrls {
    #[serde(default)]
    pub regular: Option<String>,
    #[serde(default)]
    pub original: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageEntry {
    #[serde(default)]
    pub urls: ImageUrls,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UgoiraBody {
    pub src: String,
    pub frames: Vec<RawFrame>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFrame {
    pub file: String,
    pub delay: i64,
}

/// Metadata of a single post, fetched fresh per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMetadata {
    pub post_id: String,
    pub title: String,
    pub author_name: String,
    pub author_id: String,
    pub author_url: String,
    /// At least 1 for static posts.
    pub page_count: u32,
    pub is_adult_content: bool,
    pub is_frame_animation: bool,
    pub description_html: String,
    /// Display-size URL of the first page, absent on restricted posts.
    pub image_url: Option<String>,
}

impl PostMetadata {
    pub(crate) fn from_api(post_id: &str, body: IllustBody) -> Result<Self, UpstreamError> {
        let is_frame_animation = body.illust_type == ILLUST_TYPE_UGOIRA;
        if body.page_count == 0 && !is_frame_animation {
            return Err(UpstreamError::Malformed(format!(
                "post {post_id} reports zero pages"
            )));
        }

        Ok(Self {
            post_id: post_id.to_string(),
            title: body.title,
            author_url: format!("https://www.pixiv.net/users/{}", body.user_id),
            author_name: body.user_name,
            author_id: body.user_id,
            page_count: body.page_count,
            is_adult_content: body.x_restrict > 0,
            is_frame_animation,
            description_html: body.description,
            image_url: body.urls.regular,
        })
    }

    pub fn post_url(&self) -> String {
        format!("https://www.pixiv.net/artworks/{}", self.post_id)
    }
}

/// One animation frame as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file_name: String,
    /// Display duration, always positive.
    pub delay_ms: u32,
}

impl Frame {
    /// Delay in hundredths of a second, rounded, never below 1.
    pub fn delay_centis(&self) -> u32 {
        (self.delay_ms.saturating_add(5) / 10).max(1)
    }

    /// Delay in seconds.
    pub fn delay_secs(&self) -> f64 {
        f64::from(self.delay_ms) / 1000.0
    }
}

/// Ordered frame list of an animation plus the archive holding the frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameManifest {
    pub archive_url: String,
    pub frames: Vec<Frame>,
}

impl FrameManifest {
    pub fn new(archive_url: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            archive_url: archive_url.into(),
            frames,
        }
    }

    pub(crate) fn from_api(post_id: &str, body: UgoiraBody) -> Result<Self, UpstreamError> {
        if body.frames.is_empty() {
            return Err(UpstreamError::Malformed(format!(
                "animation {post_id} has no frames"
            )));
        }

        let frames = body
            .frames
            .into_iter()
            .map(|raw| {
                if !is_plain_file_name(&raw.file) {
                    return Err(UpstreamError::Malformed(format!(
                        "animation {post_id} frame has unsafe name {:?}",
                        raw.file
                    )));
                }
                let delay_ms = u32::try_from(raw.delay)
                    .ok()
                    .filter(|delay| *delay > 0)
                    .ok_or_else(|| {
                        UpstreamError::Malformed(format!(
                            "animation {post_id} frame {} has delay {}",
                            raw.file, raw.delay
                        ))
                    })?;
                Ok(Frame {
                    file_name: raw.file,
                    delay_ms,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            archive_url: body.src,
            frames,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total playback time in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.frames.iter().map(|f| u64::from(f.delay_ms)).sum()
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('-')
        && name != CONCAT_SCRIPT_NAME
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn illust(illust_type: u8, page_count: u32, x_restrict: u8) -> IllustBody {
        serde_json::from_value(json!({
            "title": "Sunset",
            "userName": "painter",
            "userId": "777",
            "pageCount": page_count,
            "xRestrict": x_restrict,
            "illustType": illust_type,
            "description": "<b>hello</b>",
            "urls": { "regular": "https://i.pximg.net/img-master/1_p0_master1200.jpg" }
        }))
        .unwrap()
    }

    #[test]
    fn test_metadata_from_static_post() {
        let meta = PostMetadata::from_api("1", illust(0, 3, 0)).unwrap();
        assert_eq!(meta.page_count, 3);
        assert!(!meta.is_adult_content);
        assert!(!meta.is_frame_animation);
        assert_eq!(meta.author_url, "https://www.pixiv.net/users/777");
        assert_eq!(meta.post_url(), "https://www.pixiv.net/artworks/1");
        assert_eq!(
            meta.image_url.as_deref(),
            Some("https://i.pximg.net/img-master/1_p0_master1200.jpg")
        );
    }

    #[test]
    fn test_metadata_flags() {
        let meta = PostMetadata::from_api("1", illust(ILLUST_TYPE_UGOIRA, 1, 1)).unwrap();
        assert!(meta.is_adult_content);
        assert!(meta.is_frame_animation);

        let meta = PostMetadata::from_api("1", illust(1, 1, 2)).unwrap();
        assert!(meta.is_adult_content);
        assert!(!meta.is_frame_animation);
    }

    #[test]
    fn test_zero_pages_rejected_for_static_post() {
        assert!(matches!(
            PostMetadata::from_api("1", illust(0, 0, 0)),
            Err(UpstreamError::Malformed(_))
        ));
        assert!(PostMetadata::from_api("1", illust(ILLUST_TYPE_UGOIRA, 0, 0)).is_ok());
    }

    #[test]
    fn test_missing_required_field_fails_to_parse() {
        let parsed = serde_json::from_value::<IllustBody>(json!({ "title": "x" }));
        assert!(parsed.is_err());
    }

    fn ugoira(frames: Value) -> UgoiraBody {
        serde_json::from_value(json!({
            "src": "https://i.pximg.net/ugoira/1_ugoira600x600.zip",
            "originalSrc": "https://i.pximg.net/ugoira/1_ugoira1920x1080.zip",
            "frames": frames,
        }))
        .unwrap()
    }

    #[test]
    fn test_manifest_preserves_order() {
        let manifest = FrameManifest::from_api(
            "1",
            ugoira(json!([
                { "file": "000001.jpg", "delay": 100 },
                { "file": "000000.jpg", "delay": 150 }
            ])),
        )
        .unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.frames[0].file_name, "000001.jpg");
        assert_eq!(manifest.frames[1].delay_ms, 150);
        assert_eq!(manifest.duration_ms(), 250);
        assert!(manifest.archive_url.ends_with("600x600.zip"));
    }

    #[test]
    fn test_manifest_rejects_bad_frames() {
        for frames in [
            json!([]),
            json!([{ "file": "a.png", "delay": 0 }]),
            json!([{ "file": "a.png", "delay": -40 }]),
            json!([{ "file": "../a.png", "delay": 40 }]),
            json!([{ "file": "dir/a.png", "delay": 40 }]),
            json!([{ "file": "-a.png", "delay": 40 }]),
            json!([{ "file": CONCAT_SCRIPT_NAME, "delay": 40 }]),
        ] {
            let result = FrameManifest::from_api("1", ugoira(frames.clone()));
            assert!(
                matches!(result, Err(UpstreamError::Malformed(_))),
                "{frames}"
            );
        }
    }

    #[test]
    fn test_frame_delay_units() {
        let frame = |delay_ms| Frame {
            file_name: "a.png".to_string(),
            delay_ms,
        };
        assert_eq!(frame(100).delay_centis(), 10);
        assert_eq!(frame(150).delay_centis(), 15);
        assert_eq!(frame(33).delay_centis(), 3);
        assert_eq!(frame(2).delay_centis(), 1);
        assert_eq!(frame(u32::MAX).delay_centis(), u32::MAX / 10);
        assert_eq!(frame(u32::MAX - 4).delay_centis(), u32::MAX / 10);
        assert_eq!(frame(100).delay_secs(), 0.1);
        assert_eq!(frame(1500).delay_secs(), 1.5);
    }
}
