//! Supported platforms and target resolution
//!
//! A target is the video or post whose comment stream is harvested. Users
//! pass URLs or bare identifiers; this module turns them into the numeric id
//! each comment API expects, resolving Bilibili `BV` ids through the video
//! view API. Failure to resolve aborts the session before any page is
//! fetched.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use crate::crawler::endpoint::{EndpointVariant, Paging, SortParam};
use crate::crawler::transport::{QueryParams, Transport};
use crate::utils::error::HarvestError;

/// Bilibili video metadata endpoint used to resolve `BV` ids
pub const BILIBILI_VIEW_API: &str = "https://api.bilibili.com/x/web-interface/view";

static BVID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(BV[0-9A-Za-z]{10})\b").expect("Invalid BV regex"));
static AID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|/|\b)av(\d+)\b").expect("Invalid av regex"));
static WEIBO_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"weibo\.(?:cn|com)/(?:detail/|status/|\d+/)([0-9A-Za-z]+)")
        .expect("Invalid Weibo URL regex")
});

/// Comment platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Bilibili,
    Weibo,
}

impl Platform {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bilibili => "bilibili",
            Self::Weibo => "weibo",
        }
    }

    /// Guess the platform from a URL or identifier
    pub fn detect(input: &str) -> Option<Self> {
        let lower = input.to_lowercase();
        if lower.contains("bilibili.com") || BVID_REGEX.is_match(input) || AID_REGEX.is_match(input)
        {
            Some(Self::Bilibili)
        } else if lower.contains("weibo.") {
            Some(Self::Weibo)
        } else {
            None
        }
    }

    /// Endpoint variants for top-level comments, in priority order
    pub fn default_top_level_endpoints(&self) -> Vec<EndpointVariant> {
        match self {
            Self::Bilibili => vec![
                bilibili_variant(
                    "reply-main",
                    "https://api.bilibili.com/x/v2/reply/main",
                    Paging::Cursor {
                        param: "next".into(),
                    },
                    Some(sort_param("mode", "2", "3")),
                    &[],
                ),
                bilibili_variant(
                    "reply-paged",
                    "https://api.bilibili.com/x/v2/reply",
                    Paging::Page { param: "pn".into() },
                    Some(sort_param("sort", "0", "2")),
                    &[("nohot", "1")],
                ),
                bilibili_variant(
                    "reply-wbi-main",
                    "https://api.bilibili.com/x/v2/reply/wbi/main",
                    Paging::Cursor {
                        param: "next".into(),
                    },
                    Some(sort_param("mode", "2", "3")),
                    &[],
                ),
                bilibili_variant(
                    "reply-jsonp",
                    "https://api.bilibili.com/x/v2/reply",
                    Paging::Page { param: "pn".into() },
                    Some(sort_param("sort", "0", "2")),
                    &[("jsonp", "jsonp"), ("callback", "__jp0")],
                ),
            ],
            Self::Weibo => vec![EndpointVariant {
                name: "hotflow".into(),
                url: "https://m.weibo.cn/comments/hotflow".into(),
                target_param: Some("id".into()),
                target_aliases: vec!["mid".into()],
                root_param: None,
                paging: Paging::Cursor {
                    param: "max_id".into(),
                },
                size_param: None,
                sort: None,
                extra_params: params(&[("max_id_type", "0")]),
                success_field: "ok".into(),
                success_value: 1,
            }],
        }
    }

    /// Endpoint variants for reply sub-threads, in priority order
    pub fn default_reply_endpoints(&self) -> Vec<EndpointVariant> {
        match self {
            Self::Bilibili => ["reply-reply", "reply-detail"]
                .into_iter()
                .map(|name| {
                    let path = name.trim_start_matches("reply-");
                    let mut variant = bilibili_variant(
                        name,
                        &format!("https://api.bilibili.com/x/v2/reply/{path}"),
                        Paging::Page { param: "pn".into() },
                        None,
                        &[],
                    );
                    variant.root_param = Some("root".into());
                    variant
                })
                .collect(),
            Self::Weibo => vec![EndpointVariant {
                name: "hotflow-child".into(),
                url: "https://m.weibo.cn/comments/hotFlowChild".into(),
                target_param: None,
                target_aliases: vec![],
                root_param: Some("cid".into()),
                paging: Paging::Cursor {
                    param: "max_id".into(),
                },
                size_param: None,
                sort: None,
                extra_params: params(&[("max_id_type", "0")]),
                success_field: "ok".into(),
                success_value: 1,
            }],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bilibili" | "bili" | "b" => Ok(Self::Bilibili),
            "weibo" | "wb" => Ok(Self::Weibo),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn sort_param(param: &str, by_time: &str, by_popularity: &str) -> SortParam {
    SortParam {
        param: param.into(),
        by_time: by_time.into(),
        by_popularity: by_popularity.into(),
    }
}

fn bilibili_variant(
    name: &str,
    url: &str,
    paging: Paging,
    sort: Option<SortParam>,
    extra: &[(&str, &str)],
) -> EndpointVariant {
    let mut extra_params = params(&[("type", "1")]);
    extra_params.extend(params(extra));

    EndpointVariant {
        name: name.into(),
        url: url.into(),
        target_param: Some("oid".into()),
        target_aliases: vec![],
        root_param: None,
        paging,
        size_param: Some("ps".into()),
        sort,
        extra_params,
        success_field: "code".into(),
        success_value: 0,
    }
}

// ============================================================================
// Targets
// ============================================================================

/// Parsed but not yet resolved target reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    /// Numeric Bilibili archive id
    BilibiliAid(u64),
    /// Bilibili `BV` id, resolved through the view API
    BilibiliBvid(String),
    /// Numeric Weibo post id
    WeiboId(String),
}

/// Resolved target ready for harvesting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Platform hosting the target
    pub platform: Platform,

    /// Identifier the comment APIs expect
    pub id: String,

    /// Human-readable title, when known
    pub title: Option<String>,
}

impl Target {
    /// Label used for logs and output file names
    pub fn label(&self) -> String {
        match self.platform {
            Platform::Bilibili => format!("bilibili_av{}", self.id),
            Platform::Weibo => format!("weibo_{}", self.id),
        }
    }
}

impl TargetRef {
    /// Platform this reference belongs to
    pub fn platform(&self) -> Platform {
        match self {
            Self::BilibiliAid(_) | Self::BilibiliBvid(_) => Platform::Bilibili,
            Self::WeiboId(_) => Platform::Weibo,
        }
    }
}

/// Parse a user-supplied URL or identifier
///
/// Bare numbers need a platform hint since both platforms use numeric ids.
///
/// # Errors
///
/// Returns [`HarvestError::SessionAbort`] when no identifier can be found.
pub fn parse_target(input: &str, hint: Option<Platform>) -> Result<TargetRef, HarvestError> {
    let input = input.trim();
    let abort = |reason: &str| HarvestError::SessionAbort(format!("{reason}: {input}"));

    let platform = Platform::detect(input)
        .or(hint)
        .ok_or_else(|| abort("cannot tell which platform the target belongs to"))?;

    match platform {
        Platform::Bilibili => {
            if let Some(caps) = BVID_REGEX.captures(input) {
                return Ok(TargetRef::BilibiliBvid(caps[1].to_string()));
            }
            if let Some(aid) = AID_REGEX
                .captures(input)
                .and_then(|caps| caps[1].parse::<u64>().ok())
            {
                return Ok(TargetRef::BilibiliAid(aid));
            }
            input
                .parse::<u64>()
                .map(TargetRef::BilibiliAid)
                .map_err(|_| abort("no Bilibili video id found"))
        }
        Platform::Weibo => {
            let raw = WEIBO_URL_REGEX
                .captures(input)
                .map(|caps| caps[1].to_string())
                .unwrap_or_else(|| input.to_string());

            if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
                Ok(TargetRef::WeiboId(raw))
            } else {
                weibo_mid_from_base62(&raw)
                    .map(TargetRef::WeiboId)
                    .ok_or_else(|| abort("no Weibo post id found"))
            }
        }
    }
}

/// Decode a base62 Weibo post code (as found in `weibo.com/<uid>/<code>`)
///
/// The code is split into 4-character groups from the right; each group
/// encodes up to 7 decimal digits.
pub fn weibo_mid_from_base62(code: &str) -> Option<String> {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    if code.is_empty() || code.len() > 16 || !code.is_ascii() {
        return None;
    }

    let bytes = code.as_bytes();
    let mut groups = Vec::new();
    let mut end = bytes.len();
    while end > 0 {
        let start = end.saturating_sub(4);
        groups.push(&bytes[start..end]);
        end = start;
    }
    groups.reverse();

    let mut mid = String::new();
    for (i, group) in groups.iter().enumerate() {
        let mut value: u64 = 0;
        for b in group.iter() {
            let digit = ALPHABET.iter().position(|a| a == b)? as u64;
            value = value * 62 + digit;
        }
        if i == 0 {
            mid.push_str(&value.to_string());
        } else {
            mid.push_str(&format!("{value:07}"));
        }
    }

    Some(mid.trim_start_matches('0').to_string()).filter(|m| !m.is_empty())
}

/// Resolve a target reference into the id used by the comment APIs
///
/// # Errors
///
/// Returns [`HarvestError::SessionAbort`] if a `BV` id cannot be resolved.
pub async fn resolve_target(
    target: &TargetRef,
    transport: &dyn Transport,
    timeout: Duration,
) -> Result<Target, HarvestError> {
    match target {
        TargetRef::BilibiliAid(aid) => Ok(Target {
            platform: Platform::Bilibili,
            id: aid.to_string(),
            title: None,
        }),
        TargetRef::WeiboId(id) => Ok(Target {
            platform: Platform::Weibo,
            id: id.clone(),
            title: None,
        }),
        TargetRef::BilibiliBvid(bvid) => {
            let abort = |reason: String| {
                HarvestError::SessionAbort(format!("cannot resolve {bvid}: {reason}"))
            };

            let mut params = QueryParams::new();
            params.insert("bvid".into(), bvid.clone());

            tracing::debug!(bvid = %bvid, "Resolving BV id");

            let raw = transport
                .fetch(BILIBILI_VIEW_API, &params, timeout)
                .await
                .map_err(|e| abort(e.to_string()))?;
            if !raw.is_success() {
                return Err(abort(format!("HTTP status {}", raw.status)));
            }

            let body: Value =
                serde_json::from_str(&raw.body).map_err(|e| abort(e.to_string()))?;
            if body.get("code").and_then(Value::as_i64) != Some(0) {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(abort(message.to_string()));
            }

            let aid = body
                .pointer("/data/aid")
                .and_then(Value::as_u64)
                .ok_or_else(|| abort("response carries no aid".to_string()))?;

            Ok(Target {
                platform: Platform::Bilibili,
                id: aid.to_string(),
                title: body
                    .pointer("/data/title")
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        }
    }
}
