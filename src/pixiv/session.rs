//! Shared HTTP session for pixiv requests.
//!
//! Built once at startup and cloned into every component that talks to
//! pixiv. The session cookie and browser-like headers are baked into the
//! client's default headers and never change afterwards.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER, USER_AGENT};
use thiserror::Error;

/// Default pixiv web root.
pub const DEFAULT_BASE_URL: &str = "https://www.pixiv.net";

/// Desktop browser identity expected by the web API.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:80.0) Gecko/20100101 Firefox/82.0";

/// Default overall request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Name of the pixiv session cookie.
const SESSION_COOKIE_NAME: &str = "PHPSESSID";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid header value for {name}")]
    InvalidHeader { name: &'static str },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Options for [`HttpSession::new`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Immutable, cheaply cloneable HTTP client carrying pixiv credentials.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSession {
    /// Build a session. An empty `session_cookie` yields an anonymous session.
    pub fn new(session_cookie: &str, options: SessionOptions) -> Result<Self, SessionError> {
        let base_url = options.base_url.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&options.user_agent)
                .map_err(|_| SessionError::InvalidHeader { name: "User-Agent" })?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{}/", base_url))
                .map_err(|_| SessionError::InvalidHeader { name: "Referer" })?,
        );

        let session_cookie = session_cookie.trim();
        if !session_cookie.is_empty() {
            let mut cookie =
                HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE_NAME, session_cookie))
                    .map_err(|_| SessionError::InvalidHeader { name: "Cookie" })?;
            cookie.set_sensitive(true);
            headers.insert(COOKIE, cookie);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(options.timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path relative to the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let session = HttpSession::new(
            "cookie",
            SessionOptions {
                base_url: "http://127.0.0.1:9000/".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(session.base_url(), "http://127.0.0.1:9000");
        assert_eq!(
            session.endpoint("/ajax/illust/1"),
            "http://127.0.0.1:9000/ajax/illust/1"
        );
        assert_eq!(
            session.endpoint("ajax/illust/1/pages"),
            "http://127.0.0.1:9000/ajax/illust/1/pages"
        );
    }

    #[test]
    fn test_anonymous_session_builds() {
        assert!(HttpSession::new("", SessionOptions::default()).is_ok());
    }

    #[test]
    fn test_cookie_with_newline_is_rejected() {
        let err = HttpSession::new("abc\ndef", SessionOptions::default()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidHeader { name: "Cookie" }));
    }
}
