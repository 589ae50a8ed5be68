//! Response normalization
//!
//! Maps the heterogeneous JSON shapes returned by the comment APIs onto
//! [`CommentRecord`]. The reply list is located with a closed set of
//! [`ShapeStrategy`] values tried in priority order; individual fields are
//! looked up through ordered alternative key paths. Missing optional fields
//! fall back to empty defaults, and a malformed entry is skipped without
//! affecting the rest of the page.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::models::{
    synthetic_id, AuthorProfile, CommentRecord, Gender, NormalizedPage, TerminationSignal,
};
use crate::utils::error::HarvestError;
use crate::utils::normalize_whitespace;

// ============================================================================
// Shape Strategies
// ============================================================================

/// Known locations of the reply list, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeStrategy {
    /// `data.replies` (Bilibili main and reply endpoints)
    DataReplies,
    /// `data.data` (Weibo hotflow)
    DataData,
    /// `data.root.replies` (Bilibili reply detail)
    RootReplies,
    /// `data.comments`
    DataComments,
    /// `data` itself is the list (Weibo hotFlowChild)
    DataList,
}

impl ShapeStrategy {
    /// All strategies in the order they are tried
    pub const ALL: [ShapeStrategy; 5] = [
        Self::DataReplies,
        Self::DataData,
        Self::RootReplies,
        Self::DataComments,
        Self::DataList,
    ];

    fn pointer(self) -> &'static str {
        match self {
            Self::DataReplies => "/data/replies",
            Self::DataData => "/data/data",
            Self::RootReplies => "/data/root/replies",
            Self::DataComments => "/data/comments",
            Self::DataList => "/data",
        }
    }

    /// Return the list if `body` has this shape
    pub fn locate(self, body: &Value) -> Option<&Vec<Value>> {
        body.pointer(self.pointer()).and_then(Value::as_array)
    }

    /// Whether `body` carries this strategy's key with an explicit null
    fn is_null_in(self, body: &Value) -> bool {
        matches!(body.pointer(self.pointer()), Some(Value::Null))
    }
}

/// Locate the reply list; an explicit `null` list counts as an empty page
fn locate_entries(body: &Value) -> Option<(&[Value], Option<ShapeStrategy>)> {
    if let Some((strategy, list)) = ShapeStrategy::ALL
        .iter()
        .find_map(|s| s.locate(body).map(|list| (*s, list)))
    {
        return Some((list.as_slice(), Some(strategy)));
    }

    if ShapeStrategy::ALL.iter().any(|s| s.is_null_in(body)) {
        return Some((&[] as &[Value], None));
    }

    None
}

// ============================================================================
// Field Paths
// ============================================================================

const ID_PATHS: &[&str] = &["rpid_str", "rpid", "idstr", "id"];
const PARENT_PATHS: &[&str] = &["parent_str", "parent", "rootid", "root"];
const AUTHOR_ID_PATHS: &[&str] = &["member.mid", "user.id", "mid"];
const AUTHOR_NAME_PATHS: &[&str] = &["member.uname", "user.screen_name", "uname"];
const BODY_PATHS: &[&str] = &["content.message", "text_raw", "text"];
const LIKE_PATHS: &[&str] = &["like", "like_count", "like_counts"];
const REPLY_COUNT_PATHS: &[&str] = &["rcount", "total_number", "reply_count", "count"];
const CREATED_PATHS: &[&str] = &["ctime", "created_at"];
const FLOOR_PATHS: &[&str] = &["floor", "floor_number"];
const LEVEL_PATHS: &[&str] = &["member.level_info.current_level", "user.urank"];
const VIP_PATHS: &[&str] = &["member.vip.vipStatus", "member.vip.status", "user.mbrank"];
const VERIFY_PATHS: &[&str] = &["member.official_verify.desc", "user.verified_reason"];
const LOCATION_PATHS: &[&str] = &["reply_control.location", "source"];
const GENDER_PATHS: &[&str] = &["member.sex", "user.gender"];

/// Resolve a dotted key path
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.get(key))
        .filter(|v| !v.is_null())
}

/// First non-null value among alternative paths
fn first<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|path| lookup(value, path))
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(u64::from(*b)),
        _ => None,
    }
}

fn first_id(value: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| lookup(value, p).and_then(as_id))
}

fn first_u64(value: &Value, paths: &[&str]) -> Option<u64> {
    paths.iter().find_map(|p| lookup(value, p).and_then(as_u64))
}

fn first_str(value: &Value, paths: &[&str]) -> String {
    paths
        .iter()
        .find_map(|p| lookup(value, p).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

// ============================================================================
// Timestamps
// ============================================================================

/// Parse epoch seconds, epoch milliseconds, or a textual timestamp
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(epoch) = s.parse::<i64>() {
                return from_epoch(epoch);
            }
            // Weibo: "Sat Oct 26 20:14:34 +0800 2024"
            DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y")
                .or_else(|_| DateTime::parse_from_rfc3339(s))
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| naive.and_utc())
                })
        }
        _ => None,
    }
}

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    // Values past year 2286 in seconds are treated as milliseconds
    if epoch > 9_999_999_999 {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}

// ============================================================================
// Text Cleaning
// ============================================================================

static IMG_ALT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]*?\balt\s*=\s*["']([^"']*)["'][^>]*>"#).expect("Invalid img regex")
});
static HTML_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("Invalid tag regex"));
static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>　]+").expect("Invalid URL regex"));

/// Render an emote description as `[description]`
fn emote_placeholder(description: &str) -> String {
    let inner = description.trim().trim_start_matches('[').trim_end_matches(']');
    format!("[{inner}]")
}

/// Clean comment text into plain readable form
///
/// Emote codes found in `emotes` and `<img alt>` icons become `[description]`
/// placeholders; remaining tags, HTML entities and raw URLs are removed and
/// whitespace is collapsed.
pub fn clean_body(text: &str, emotes: Option<&Map<String, Value>>) -> String {
    let mut text = text.to_string();

    if let Some(emotes) = emotes {
        for (code, emote) in emotes {
            let description = emote
                .get("text")
                .or_else(|| emote.pointer("/meta/alias"))
                .and_then(Value::as_str)
                .unwrap_or(code);
            text = text.replace(code.as_str(), &emote_placeholder(description));
        }
    }

    let text = IMG_ALT_REGEX.replace_all(&text, |caps: &regex::Captures<'_>| {
        emote_placeholder(&caps[1])
    });
    let text = HTML_TAG_REGEX.replace_all(&text, " ");
    let text = html_escape::decode_html_entities(&text);
    let text = URL_REGEX.replace_all(&text, " ");

    normalize_whitespace(&text)
}

fn strip_location_prefix(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("IP属地：")
        .trim_start_matches("IP属地:")
        .trim_start_matches("来自")
        .trim()
        .to_string()
}

// ============================================================================
// Record Normalization
// ============================================================================

/// Normalize one raw reply entry
///
/// # Errors
///
/// Returns [`HarvestError::RecordParse`] when the entry is not an object or
/// carries neither an identifier nor a body.
pub fn normalize_record(entry: &Value, index: usize) -> Result<CommentRecord, HarvestError> {
    if !entry.is_object() {
        return Err(HarvestError::RecordParse {
            index,
            reason: "entry is not an object".to_string(),
        });
    }

    let raw_body = first(entry, BODY_PATHS).and_then(Value::as_str);
    let emotes = lookup(entry, "content.emote").and_then(Value::as_object);
    let body = raw_body.map(|b| clean_body(b, emotes)).unwrap_or_default();

    let id = match (first_id(entry, ID_PATHS), raw_body) {
        (Some(id), _) => id,
        (None, Some(_)) => synthetic_id(&body),
        (None, None) => {
            return Err(HarvestError::RecordParse {
                index,
                reason: "entry has neither id nor body".to_string(),
            })
        }
    };

    let parent_id = first_id(entry, PARENT_PATHS).filter(|p| p != "0" && *p != id);

    let author = AuthorProfile {
        level: first_u64(entry, LEVEL_PATHS)
            .and_then(|l| u32::try_from(l).ok())
            .unwrap_or_default(),
        is_vip: first_u64(entry, VIP_PATHS).is_some_and(|v| v > 0),
        verification: first_str(entry, VERIFY_PATHS),
        location: strip_location_prefix(&first_str(entry, LOCATION_PATHS)),
        gender: Gender::from_code(&first_str(entry, GENDER_PATHS)),
    };

    Ok(CommentRecord {
        id,
        parent_id,
        author_id: first_u64(entry, AUTHOR_ID_PATHS).unwrap_or_default(),
        author_name: first_str(entry, AUTHOR_NAME_PATHS),
        body,
        like_count: first_u64(entry, LIKE_PATHS).unwrap_or_default(),
        reply_count: first_u64(entry, REPLY_COUNT_PATHS).unwrap_or_default(),
        created_at: first(entry, CREATED_PATHS)
            .and_then(parse_timestamp)
            .unwrap_or_default(),
        rank_or_floor: first_u64(entry, FLOOR_PATHS).filter(|f| *f > 0),
        author,
    })
}

const TOTAL_POINTERS: &[&str] = &[
    "/data/page/count",
    "/data/cursor/all_count",
    "/data/total_number",
    "/total_number",
];

/// Extract the termination signal from a response body
pub fn extract_signal(body: &Value) -> TerminationSignal {
    let mut signal = TerminationSignal {
        is_end: body.pointer("/data/cursor/is_end").and_then(Value::as_bool),
        total_count: TOTAL_POINTERS
            .iter()
            .find_map(|p| body.pointer(p).and_then(as_u64)),
        next_cursor: None,
    };

    if let Some(next) = body.pointer("/data/cursor/next").and_then(as_id) {
        signal.next_cursor = Some(next);
    }

    // Weibo pages by max_id; a zero max_id marks the last page
    if let Some(max_id) = ["/data/max_id", "/max_id"]
        .iter()
        .find_map(|p| body.pointer(p).and_then(as_id))
    {
        if max_id == "0" {
            signal.is_end = Some(true);
            signal.next_cursor = None;
        } else {
            signal.is_end.get_or_insert(false);
            signal.next_cursor = Some(max_id);
        }
    }

    signal
}

/// Normalize one page body into records and a termination signal
///
/// # Errors
///
/// Returns [`HarvestError::MalformedResponse`] when no known shape matches.
pub fn normalize_page(body: &Value, endpoint: &str) -> Result<NormalizedPage, HarvestError> {
    let (entries, strategy) =
        locate_entries(body).ok_or_else(|| HarvestError::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: "no recognised comment list in response".to_string(),
        })?;

    let mut page = NormalizedPage {
        records: Vec::with_capacity(entries.len()),
        raw_count: entries.len(),
        skipped: 0,
        signal: extract_signal(body),
    };

    for (index, entry) in entries.iter().enumerate() {
        match normalize_record(entry, index) {
            Ok(record) => page.records.push(record),
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "Skipping unparseable reply entry");
                page.skipped += 1;
            }
        }
    }

    tracing::trace!(
        endpoint = %endpoint,
        strategy = ?strategy,
        raw = page.raw_count,
        kept = page.records.len(),
        "Normalized page"
    );

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_priority() {
        let body = json!({"data": {"replies": [{"rpid": 1}], "data": [{"id": 2}]}});
        let (entries, strategy) = locate_entries(&body).unwrap();
        assert_eq!(strategy, Some(ShapeStrategy::DataReplies));
        assert_eq!(entries.len(), 1);

        let body = json!({"ok": 1, "data": [{"id": 2}, {"id": 3}]});
        let (entries, strategy) = locate_entries(&body).unwrap();
        assert_eq!(strategy, Some(ShapeStrategy::DataList));
        assert_eq!(entries.len(), 2);

        let body = json!({"data": {"root": {"replies": [{"rpid": 9}]}}});
        let (_, strategy) = locate_entries(&body).unwrap();
        assert_eq!(strategy, Some(ShapeStrategy::RootReplies));
    }

    #[test]
    fn test_null_replies_is_empty_page() {
        let body = json!({"code": 0, "data": {"replies": null, "page": {"count": 0}}});
        let page = normalize_page(&body, "main").unwrap();
        assert_eq!(page.raw_count, 0);
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_unknown_shape_is_malformed() {
        let body = json!({"code": 0, "data": {"something": 1}});
        assert!(matches!(
            normalize_page(&body, "main"),
            Err(HarvestError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_bilibili_record() {
        let entry = json!({
            "rpid": 5001,
            "parent": 0,
            "root": 0,
            "mid": 77,
            "rcount": 12,
            "like": 340,
            "ctime": 1_700_000_000,
            "floor": 3,
            "member": {
                "mid": "77",
                "uname": "测试用户",
                "sex": "女",
                "level_info": {"current_level": 6},
                "vip": {"vipStatus": 1},
                "official_verify": {"desc": "知名UP主"}
            },
            "content": {
                "message": "太好看了[doge] https://b23.tv/abc",
                "emote": {"[doge]": {"text": "[doge]"}}
            },
            "reply_control": {"location": "IP属地：广东"}
        });

        let record = normalize_record(&entry, 0).unwrap();
        assert_eq!(record.id, "5001");
        assert!(record.parent_id.is_none());
        assert_eq!(record.author_id, 77);
        assert_eq!(record.author_name, "测试用户");
        assert_eq!(record.body, "太好看了[doge]");
        assert_eq!(record.like_count, 340);
        assert_eq!(record.reply_count, 12);
        assert_eq!(record.rank_or_floor, Some(3));
        assert_eq!(record.created_at.timestamp(), 1_700_000_000);
        assert_eq!(record.author.level, 6);
        assert!(record.author.is_vip);
        assert_eq!(record.author.verification, "知名UP主");
        assert_eq!(record.author.location, "广东");
        assert_eq!(record.author.gender, Gender::Female);
    }

    #[test]
    fn test_weibo_record() {
        let entry = json!({
            "id": 4900000000000001_u64,
            "rootid": "4900000000000001",
            "created_at": "Sat Oct 26 20:14:34 +0800 2024",
            "like_count": 8,
            "total_number": 2,
            "source": "来自北京",
            "text": "说得对<span class=\"url-icon\"><img alt=\"[笑cry]\" src=\"x.png\" /></span> &amp; 赞",
            "user": {"id": 123, "screen_name": "微博网友", "gender": "m", "verified_reason": ""}
        });

        let record = normalize_record(&entry, 0).unwrap();
        assert_eq!(record.id, "4900000000000001");
        assert!(record.parent_id.is_none(), "rootid equal to own id is top-level");
        assert_eq!(record.body, "说得对 [笑cry] & 赞");
        assert_eq!(record.author_name, "微博网友");
        assert_eq!(record.author.gender, Gender::Male);
        assert_eq!(record.author.location, "北京");
        assert_eq!(record.reply_count, 2);
        assert_eq!(
            record.created_at.to_rfc3339(),
            "2024-10-26T12:14:34+00:00"
        );
    }

    #[test]
    fn test_missing_author_block_uses_defaults() {
        let entry = json!({"rpid": 10, "content": {"message": "无名评论"}});
        let record = normalize_record(&entry, 0).unwrap();
        assert_eq!(record.author_id, 0);
        assert_eq!(record.author_name, "");
        assert!(!record.author.is_vip);
        assert_eq!(record.author.verification, "");
        assert_eq!(record.like_count, 0);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let body = json!({"data": {"replies": [
            {"rpid": 1, "content": {"message": "一"}},
            "garbage",
            {"like": 3},
            {"rpid": 2, "content": {"message": "二"}}
        ]}});
        let page = normalize_page(&body, "main").unwrap();
        assert_eq!(page.raw_count, 4);
        assert_eq!(page.skipped, 2);
        let ids: Vec<_> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_synthetic_id_when_id_missing() {
        let entry = json!({"text": "没有编号的评论"});
        let record = normalize_record(&entry, 0).unwrap();
        assert!(record.has_synthetic_id());
    }

    #[test]
    fn test_reply_parent() {
        let entry = json!({"rpid": 11, "parent": 5001, "root": 5001, "content": {"message": "回复"}});
        let record = normalize_record(&entry, 0).unwrap();
        assert_eq!(record.parent_id.as_deref(), Some("5001"));
    }

    #[test]
    fn test_clean_body() {
        assert_eq!(clean_body("<p>你好&nbsp;世界</p>", None), "你好 世界");
        assert_eq!(
            clean_body("看这里 http://t.cn/A6abc 好", None),
            "看这里 好"
        );
        let emotes = json!({"[tv_笑]": {"meta": {"alias": "笑"}}});
        assert_eq!(
            clean_body("哈[tv_笑]", emotes.as_object()),
            "哈[笑]"
        );
    }

    #[test]
    fn test_bilibili_cursor_signal() {
        let body = json!({"data": {"cursor": {"is_end": false, "next": 3, "all_count": 120}}});
        let signal = extract_signal(&body);
        assert_eq!(signal.is_end, Some(false));
        assert_eq!(signal.next_cursor.as_deref(), Some("3"));
        assert_eq!(signal.total_count, Some(120));
    }

    #[test]
    fn test_weibo_max_id_signal() {
        let body = json!({"ok": 1, "data": {"data": [], "max_id": 0, "total_number": 40}});
        let signal = extract_signal(&body);
        assert_eq!(signal.is_end, Some(true));
        assert!(signal.next_cursor.is_none());
        assert_eq!(signal.total_count, Some(40));

        let body = json!({"ok": 1, "data": [], "max_id": 1397, "total_number": 9});
        let signal = extract_signal(&body);
        assert_eq!(signal.is_end, Some(false));
        assert_eq!(signal.next_cursor.as_deref(), Some("1397"));
        assert_eq!(signal.total_count, Some(9));
    }

    #[test]
    fn test_page_count_signal() {
        let body = json!({"data": {"page": {"num": 1, "size": 20, "count": 45}, "replies": []}});
        let signal = extract_signal(&body);
        assert_eq!(signal.total_count, Some(45));
        assert!(signal.is_end.is_none());
    }
}
