// Core data structures for the pinglun harvester

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::utils::normalize_whitespace;

/// Prefix marking identifiers derived from the comment body
pub const SYNTHETIC_ID_PREFIX: &str = "h:";

/// Comment ordering requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Newest first
    Time,
    /// Most liked / hottest first
    #[default]
    Popularity,
}

impl SortMode {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Popularity => "popularity",
        }
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "time" | "new" | "recency" => Ok(Self::Time),
            "popularity" | "hot" | "like" | "likes" => Ok(Self::Popularity),
            other => Err(format!("unknown sort mode: {other}")),
        }
    }
}

/// Commenter gender as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    /// Map the platform's one-letter code (`m`, `f`, anything else)
    pub fn from_code(code: &str) -> Self {
        match code {
            "m" | "M" | "男" => Self::Male,
            "f" | "F" | "女" => Self::Female,
            _ => Self::Unknown,
        }
    }
}

/// Optional author details; every field has an empty default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorProfile {
    /// Account level (0 when not exposed)
    pub level: u32,

    /// Paid membership flag
    pub is_vip: bool,

    /// Verification / certification description
    pub verification: String,

    /// IP location or client source label
    pub location: String,

    /// Gender
    pub gender: Gender,
}

/// Canonical comment record produced by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    /// Unique comment ID within the target's comment space
    pub id: String,

    /// Parent comment ID (None if top-level)
    pub parent_id: Option<String>,

    /// Numeric author ID (0 when missing)
    pub author_id: u64,

    /// Author display name
    pub author_name: String,

    /// Cleaned text content
    pub body: String,

    /// Like count
    pub like_count: u64,

    /// Declared number of child replies
    pub reply_count: u64,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Floor / rank position, when exposed
    pub rank_or_floor: Option<u64>,

    /// Author profile extras
    #[serde(default)]
    pub author: AuthorProfile,
}

impl CommentRecord {
    /// Create a top-level record with defaults for everything but id and body
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            author_id: 0,
            author_name: String::new(),
            body: body.into(),
            like_count: 0,
            reply_count: 0,
            created_at: DateTime::<Utc>::default(),
            rank_or_floor: None,
            author: AuthorProfile::default(),
        }
    }

    /// Check if this is a top-level comment (not a reply)
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Check if the server declared replies for this comment
    pub fn has_replies(&self) -> bool {
        self.reply_count > 0
    }

    /// Whether the identifier was derived from the body rather than the source
    pub fn has_synthetic_id(&self) -> bool {
        self.id.starts_with(SYNTHETIC_ID_PREFIX)
    }

    /// SHA256 of the normalized body
    pub fn content_hash(&self) -> String {
        content_hash(&self.body)
    }
}

/// Calculate content hash using SHA256 over whitespace-normalized text
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(body).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Synthetic identifier for entries that carry no usable id
pub fn synthetic_id(body: &str) -> String {
    let hash = content_hash(body);
    format!("{SYNTHETIC_ID_PREFIX}{}", &hash[..16])
}

/// Identifies one paginated thread inside a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadKey {
    /// The target's top-level comment stream
    TopLevel,
    /// Replies under one top-level comment
    Replies(String),
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopLevel => write!(f, "top-level"),
            Self::Replies(root) => write!(f, "replies:{root}"),
        }
    }
}

/// One fetch attempt; immutable once issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Target identifier (video aid, post mid)
    pub target_id: String,

    /// Root comment id when fetching a reply sub-thread
    pub root_id: Option<String>,

    /// 1-based page index
    pub page: u32,

    /// Opaque cursor returned by the previous page, if any
    pub cursor: Option<String>,

    /// Requested page size
    pub page_size: u32,

    /// Requested ordering
    pub sort: SortMode,
}

impl PageRequest {
    /// Thread this request belongs to
    pub fn thread(&self) -> ThreadKey {
        match &self.root_id {
            Some(root) => ThreadKey::Replies(root.clone()),
            None => ThreadKey::TopLevel,
        }
    }
}

/// Well-formed successful response returned by the fallback chain
#[derive(Debug, Clone)]
pub struct PageResult {
    /// Name of the endpoint variant that answered
    pub endpoint: String,

    /// Parsed response body
    pub body: serde_json::Value,
}

/// Server-side indication of whether more pages exist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationSignal {
    /// Explicit end-of-stream flag
    pub is_end: Option<bool>,

    /// Declared total item count for the thread
    pub total_count: Option<u64>,

    /// Cursor for the next page
    pub next_cursor: Option<String>,
}

/// Output of the normalizer for one page
#[derive(Debug, Clone, Default)]
pub struct NormalizedPage {
    /// Records that normalized successfully, in server order
    pub records: Vec<CommentRecord>,

    /// Number of raw entries found on the page (valid or not)
    pub raw_count: usize,

    /// Entries skipped as unparseable
    pub skipped: usize,

    /// Termination signal, when present
    pub signal: TerminationSignal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_mode_parse() {
        assert_eq!("time".parse::<SortMode>().unwrap(), SortMode::Time);
        assert_eq!("HOT".parse::<SortMode>().unwrap(), SortMode::Popularity);
        assert!("random".parse::<SortMode>().is_err());
    }

    #[test]
    fn test_gender_from_code() {
        assert_eq!(Gender::from_code("m"), Gender::Male);
        assert_eq!(Gender::from_code("f"), Gender::Female);
        assert_eq!(Gender::from_code("n"), Gender::Unknown);
    }

    #[test]
    fn test_content_hash_ignores_whitespace_runs() {
        assert_eq!(content_hash("hello  world"), content_hash(" hello world "));
        assert_ne!(content_hash("hello world"), content_hash("hello there"));
    }

    #[test]
    fn test_synthetic_id() {
        let id = synthetic_id("同一条评论");
        assert!(id.starts_with(SYNTHETIC_ID_PREFIX));
        assert_eq!(id.len(), SYNTHETIC_ID_PREFIX.len() + 16);
        assert_eq!(id, synthetic_id("同一条评论"));

        let mut record = CommentRecord::new(id, "同一条评论");
        assert!(record.has_synthetic_id());
        record.id = "123".into();
        assert!(!record.has_synthetic_id());
    }

    #[test]
    fn test_page_request_thread() {
        let mut req = PageRequest {
            target_id: "170001".into(),
            root_id: None,
            page: 1,
            cursor: None,
            page_size: 20,
            sort: SortMode::Time,
        };
        assert_eq!(req.thread(), ThreadKey::TopLevel);
        req.root_id = Some("42".into());
        assert_eq!(req.thread().to_string(), "replies:42");
    }
}
