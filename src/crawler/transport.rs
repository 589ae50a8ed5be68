//! HTTP transport with rate limiting and User-Agent rotation
//!
//! The [`Transport`] trait is the only seam through which the harvester
//! touches the network. Implementations report the status code and raw body
//! of every response, including non-2xx ones, and leave interpretation to the
//! fallback chain.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::seq::SliceRandom;
use reqwest::{header::HeaderValue, Client};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::crawler::headers::build_api_headers;
use crate::crawler::platform::Platform;
use crate::utils::error::FetchError;

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

/// Query parameters for one request, kept in a stable order
pub type QueryParams = BTreeMap<String, String>;

/// Status code and undecoded body of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,

    /// Response body as text
    pub body: String,
}

impl RawResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network collaborator used by the fallback chain
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET request to `endpoint` with `params`
    ///
    /// Non-2xx statuses are returned as a [`RawResponse`], not as an error.
    /// Errors are reserved for exchanges that produced no response at all.
    async fn fetch(
        &self,
        endpoint: &str,
        params: &QueryParams,
        timeout: Duration,
    ) -> Result<RawResponse, FetchError>;
}

/// Production transport backed by `reqwest`
pub struct HttpTransport {
    /// HTTP client with compression and a cookie jar
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Platform whose browser headers are sent
    platform: Platform,

    /// Cookie header forwarded verbatim
    cookie: Option<String>,

    /// Optional base URL override for testing with mock servers
    base_url: Option<String>,
}

impl HttpTransport {
    /// Create a new transport
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(platform: Platform, requests_per_second: u32) -> Result<Self, FetchError> {
        let client = Client::builder().gzip(true).cookie_store(true).build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            platform,
            cookie: None,
            base_url: None,
        })
    }

    /// Attach a cookie header acquired outside the harvester
    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie.filter(|c| !c.trim().is_empty());
        self
    }

    /// Redirect every request to `base_url`, keeping the endpoint path
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    fn resolve_url(&self, endpoint: &str) -> Result<String, FetchError> {
        let Some(base) = &self.base_url else {
            return Ok(endpoint.to_string());
        };

        if endpoint.starts_with('/') {
            return Ok(format!("{base}{endpoint}"));
        }

        let parsed =
            url::Url::parse(endpoint).map_err(|e| FetchError::InvalidUrl(format!("{endpoint}: {e}")))?;
        Ok(format!("{base}{}", parsed.path()))
    }

    fn random_user_agent() -> &'static str {
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &QueryParams,
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = self.resolve_url(endpoint)?;
        let mut headers = build_api_headers(self.platform, Self::random_user_agent());
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| FetchError::InvalidUrl(format!("invalid cookie header: {e}")))?;
            headers.insert(reqwest::header::COOKIE, value);
        }

        tracing::debug!(url = %url, params = params.len(), "Sending request");

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e)
            }
        })?;

        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_response_success_range() {
        assert!(RawResponse::new(200, "{}").is_success());
        assert!(RawResponse::new(204, "").is_success());
        assert!(!RawResponse::new(412, "").is_success());
        assert!(!RawResponse::new(503, "").is_success());
    }

    #[test]
    fn test_resolve_url_with_base() {
        let transport = HttpTransport::new(Platform::Bilibili, 10)
            .unwrap()
            .with_base_url("http://127.0.0.1:9000/");
        assert_eq!(
            transport
                .resolve_url("https://api.bilibili.com/x/v2/reply/main")
                .unwrap(),
            "http://127.0.0.1:9000/x/v2/reply/main"
        );
        assert_eq!(
            transport.resolve_url("/x/v2/reply").unwrap(),
            "http://127.0.0.1:9000/x/v2/reply"
        );
    }

    #[test]
    fn test_resolve_url_without_base() {
        let transport = HttpTransport::new(Platform::Weibo, 10).unwrap();
        assert_eq!(
            transport.resolve_url("https://m.weibo.cn/comments/hotflow").unwrap(),
            "https://m.weibo.cn/comments/hotflow"
        );
    }

    #[test]
    fn test_cookie_blank_is_dropped() {
        let transport = HttpTransport::new(Platform::Weibo, 10)
            .unwrap()
            .with_cookie(Some("   ".into()));
        assert!(transport.cookie.is_none());
    }

    #[test]
    fn test_random_user_agent() {
        let ua = HttpTransport::random_user_agent();
        assert!(USER_AGENTS.contains(&ua));
    }
}
