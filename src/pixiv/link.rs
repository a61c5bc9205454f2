//! Post reference extraction from chat message text.
//!
//! Three independent scans run over the same input: the first artwork URL
//! (with its suppression markers), a whole-word `gif` token requesting the
//! looping-image rendition, and a `p<digits>` page token.

use std::sync::LazyLock;

use regex::Regex;

static POST_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<open><)?https?://(?:www\.)?pixiv\.net/(?:[a-z]{2}/)?artworks/(?P<id>[0-9]+)(?P<rest>[^\s<>]*)(?P<close>>)?",
    )
    .unwrap()
});

static ALT_FORMAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bgif\b").unwrap());

static PAGE_HINT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bp([0-9]+)\b").unwrap());

/// A reference to a single post found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReference {
    pub post_id: String,
    /// 1-indexed page as written by the author; 0 when no page was given.
    pub page_hint: u32,
    /// The author asked for the looping-image rendition (`gif`).
    pub wants_alt_format: bool,
    /// The link was wrapped in `<...>` to hide its preview.
    pub suppressed: bool,
}

impl PostReference {
    /// Canonical web URL of the referenced post.
    pub fn post_url(&self) -> String {
        format!("https://www.pixiv.net/artworks/{}", self.post_id)
    }
}

/// Return the first post reference in `text`, or `None` when there is no
/// match or the first match was suppressed by its author.
pub fn extract(text: &str) -> Option<PostReference> {
    scan(text).filter(|reference| !reference.suppressed)
}

/// Like [`extract`], but also returns suppressed references.
pub fn scan(text: &str) -> Option<PostReference> {
    let captures = POST_URL_RE.captures(text)?;
    let post_id = captures.name("id")?.as_str().to_string();
    let suppressed = captures.name("open").is_some() && captures.name("close").is_some();

    Some(PostReference {
        post_id,
        page_hint: page_hint(text),
        wants_alt_format: ALT_FORMAT_RE.is_match(text),
        suppressed,
    })
}

fn page_hint(text: &str) -> u32 {
    PAGE_HINT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}
