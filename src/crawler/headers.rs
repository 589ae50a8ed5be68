use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT,
};

use crate::crawler::platform::Platform;

/// Build browser-like headers for a platform's comment API
///
/// Both platforms reject bare API calls without a plausible referer and
/// origin, so these mirror what the web client sends for XHR requests.
///
/// # Examples
///
/// ```
/// use pinglun::crawler::headers::build_api_headers;
/// use pinglun::crawler::platform::Platform;
///
/// let headers = build_api_headers(
///     Platform::Bilibili,
///     "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
/// );
/// assert!(headers.contains_key("referer"));
/// ```
pub fn build_api_headers(platform: Platform, user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(ua) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, ua);
    }
    headers.insert(REFERER, HeaderValue::from_static(platform_referer(platform)));
    headers.insert(ORIGIN, HeaderValue::from_static(platform_origin(platform)));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
    );

    // Sec-Fetch headers for AJAX requests
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-site"),
    );

    if platform == Platform::Weibo {
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(
            HeaderName::from_static("mweibo-pwa"),
            HeaderValue::from_static("1"),
        );
    }

    headers
}

/// Referer expected by each platform's API
pub fn platform_referer(platform: Platform) -> &'static str {
    match platform {
        Platform::Bilibili => "https://www.bilibili.com/",
        Platform::Weibo => "https://m.weibo.cn/",
    }
}

fn platform_origin(platform: Platform) -> &'static str {
    match platform {
        Platform::Bilibili => "https://www.bilibili.com",
        Platform::Weibo => "https://m.weibo.cn",
    }
}
