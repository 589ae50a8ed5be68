//! Harvest session state and final report
//!
//! A [`HarvestSession`] is owned by the single control flow harvesting one
//! target. It is mutated page by page and consumed by
//! [`HarvestSession::finalize`], which produces the [`HarvestReport`] handed
//! to the persistence collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::crawler::platform::Target;
use crate::models::{CommentRecord, ThreadKey};
use crate::storage::dedup::{CommentStore, DedupStrategy};

/// Number of commenters listed in the summary
const TOP_COMMENTERS: usize = 5;

// ============================================================================
// Session State
// ============================================================================

/// Page that exhausted its retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPage {
    /// Thread the page belongs to
    pub thread: ThreadKey,

    /// 1-based page index
    pub page: u32,

    /// Last error message
    pub error: String,

    /// When the page was given up on
    pub failed_at: DateTime<Utc>,
}

/// Mutable state of one target's harvest
#[derive(Debug)]
pub struct HarvestSession {
    target: Target,
    store: CommentStore,
    failed_pages: Vec<FailedPage>,
    failed_threads: Vec<String>,
    pages_fetched: u32,
    skipped_records: usize,
    threads_expanded: usize,
    interrupted: bool,
    started_at: DateTime<Utc>,
}

impl HarvestSession {
    /// Start a session for `target`
    pub fn new(target: Target, strategy: DedupStrategy) -> Self {
        Self {
            target,
            store: CommentStore::new(strategy),
            failed_pages: Vec::new(),
            failed_threads: Vec::new(),
            pages_fetched: 0,
            skipped_records: 0,
            threads_expanded: 0,
            interrupted: false,
            started_at: Utc::now(),
        }
    }

    /// Target being harvested
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Aggregated records so far
    pub fn store(&self) -> &CommentStore {
        &self.store
    }

    /// Add top-level records from one page
    ///
    /// Returns the records that were accepted, in arrival order. Duplicates
    /// dropped by the store are not included.
    pub fn ingest(&mut self, records: Vec<CommentRecord>) -> &[CommentRecord] {
        let before = self.store.len();
        self.store.extend(records);
        &self.store.records()[before..]
    }

    /// Add replies fetched under `root_id`, linking each to that root
    pub fn ingest_replies(&mut self, root_id: &str, records: Vec<CommentRecord>) -> usize {
        self.store.extend(records.into_iter().map(|mut record| {
            record.parent_id = Some(root_id.to_string());
            record
        }))
    }

    /// Count successfully fetched pages and the entries they skipped
    pub fn mark_pages_fetched(&mut self, pages: u32, skipped_records: usize) {
        self.pages_fetched += pages;
        self.skipped_records += skipped_records;
    }

    /// Record a page that exhausted its retries
    pub fn mark_failed_page(&mut self, thread: ThreadKey, page: u32, error: &str) {
        self.failed_pages.push(FailedPage {
            thread,
            page,
            error: error.to_string(),
            failed_at: Utc::now(),
        });
    }

    /// Record a reply thread that yielded nothing because of failures
    pub fn mark_failed_thread(&mut self, root_id: &str) {
        self.failed_threads.push(root_id.to_string());
    }

    /// Count one expanded reply thread
    pub fn mark_thread_expanded(&mut self) {
        self.threads_expanded += 1;
    }

    /// Flag the session as interrupted before completion
    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Pages that exhausted their retries
    pub fn failed_pages(&self) -> &[FailedPage] {
        &self.failed_pages
    }

    /// Deduplicate, compute statistics and produce the report
    pub fn finalize(self) -> HarvestReport {
        let duplicates = self.store.duplicates();
        let records = self.store.into_records();

        let mut stats = HarvestStats::from_records(&records);
        stats.duplicates_removed = duplicates;
        stats.skipped_records = self.skipped_records;
        stats.pages_fetched = self.pages_fetched;
        stats.failed_page_count = self.failed_pages.len();
        stats.failed_thread_count = self.failed_threads.len();
        stats.threads_expanded = self.threads_expanded;

        HarvestReport {
            target: self.target,
            records,
            stats,
            failed_pages: self.failed_pages,
            failed_threads: self.failed_threads,
            interrupted: self.interrupted,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Finalized result of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestReport {
    pub target: Target,
    pub records: Vec<CommentRecord>,
    pub stats: HarvestStats,
    pub failed_pages: Vec<FailedPage>,
    pub failed_threads: Vec<String>,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HarvestReport {
    /// Whether any page or thread failed
    pub fn is_partial(&self) -> bool {
        self.interrupted || !self.failed_pages.is_empty() || !self.failed_threads.is_empty()
    }
}

/// Like-count distribution summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeSummary {
    pub min: u64,
    pub max: u64,
    pub total: u64,
    pub mean: f64,
    pub median: f64,
}

impl LikeSummary {
    fn from_counts(counts: &[u64]) -> Option<Self> {
        use statrs::statistics::{Data, Median, Statistics};

        let min = *Iterator::min(counts.iter())?;
        let max = *Iterator::max(counts.iter())?;
        let values: Vec<f64> = counts.iter().map(|c| *c as f64).collect();
        let mean = values.iter().mean();
        let median = Data::new(values).median();

        Some(Self {
            min,
            max,
            total: counts.iter().sum(),
            mean,
            median,
        })
    }
}

/// Commenter with the number of comments kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommenterCount {
    pub author_id: u64,
    pub author_name: String,
    pub comments: usize,
}

/// Run statistics exposed alongside the records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestStats {
    pub record_count: usize,
    pub top_level_count: usize,
    pub reply_count: usize,
    pub duplicates_removed: usize,
    pub skipped_records: usize,
    pub pages_fetched: u32,
    pub failed_page_count: usize,
    pub failed_thread_count: usize,
    pub threads_expanded: usize,
    pub distinct_authors: usize,
    pub likes: Option<LikeSummary>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub top_commenters: Vec<CommenterCount>,
}

impl HarvestStats {
    /// Compute record-derived statistics
    pub fn from_records(records: &[CommentRecord]) -> Self {
        let top_level_count = records.iter().filter(|r| r.is_top_level()).count();

        let mut authors: HashMap<(u64, &str), usize> = HashMap::new();
        for record in records {
            if record.author_id != 0 || !record.author_name.is_empty() {
                *authors
                    .entry((record.author_id, record.author_name.as_str()))
                    .or_default() += 1;
            }
        }
        let distinct_authors = authors
            .keys()
            .map(|(id, name)| if *id != 0 { id.to_string() } else { name.to_string() })
            .collect::<HashSet<_>>()
            .len();

        let mut top_commenters: Vec<CommenterCount> = authors
            .into_iter()
            .map(|((author_id, name), comments)| CommenterCount {
                author_id,
                author_name: name.to_string(),
                comments,
            })
            .collect();
        top_commenters.sort_by(|a, b| {
            b.comments
                .cmp(&a.comments)
                .then_with(|| a.author_name.cmp(&b.author_name))
                .then_with(|| a.author_id.cmp(&b.author_id))
        });
        top_commenters.truncate(TOP_COMMENTERS);

        let likes: Vec<u64> = records.iter().map(|r| r.like_count).collect();
        let unknown = DateTime::<Utc>::default();
        let timestamps = records
            .iter()
            .map(|r| r.created_at)
            .filter(|t| *t != unknown);

        Self {
            record_count: records.len(),
            top_level_count,
            reply_count: records.len() - top_level_count,
            distinct_authors,
            likes: LikeSummary::from_counts(&likes),
            earliest: timestamps.clone().min(),
            latest: timestamps.max(),
            top_commenters,
            ..Default::default()
        }
    }

    /// Share of records that are replies
    pub fn reply_ratio(&self) -> f64 {
        if self.record_count == 0 {
            0.0
        } else {
            self.reply_count as f64 / self.record_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::platform::Platform;
    use chrono::TimeZone;

    fn target() -> Target {
        Target {
            platform: Platform::Bilibili,
            id: "170001".into(),
            title: None,
        }
    }

    fn record(id: &str, author: u64, likes: u64) -> CommentRecord {
        let mut r = CommentRecord::new(id, format!("comment {id}"));
        r.author_id = author;
        r.author_name = format!("user{author}");
        r.like_count = likes;
        r
    }

    #[test]
    fn test_replies_are_linked_to_root() {
        let mut session = HarvestSession::new(target(), DedupStrategy::Identity);
        session.ingest(vec![record("1", 1, 0)]);

        let mut reply = record("2", 2, 0);
        reply.parent_id = Some("999".into());
        session.ingest_replies("1", vec![reply]);

        let report = session.finalize();
        assert_eq!(report.records[1].parent_id.as_deref(), Some("1"));
        assert_eq!(report.stats.top_level_count, 1);
        assert_eq!(report.stats.reply_count, 1);
    }

    #[test]
    fn test_ingest_returns_only_accepted_records() {
        let mut session = HarvestSession::new(target(), DedupStrategy::Content);
        session.ingest(vec![record("1", 1, 0)]);

        let mut same_text = CommentRecord::new("3", "comment 1");
        same_text.reply_count = 2;
        let accepted = session.ingest(vec![same_text, record("2", 2, 0)]);

        let ids: Vec<_> = accepted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[test]
    fn test_failed_pages_reported() {
        let mut session = HarvestSession::new(target(), DedupStrategy::Identity);
        session.mark_failed_page(ThreadKey::TopLevel, 2, "no viable endpoint");
        session.mark_failed_thread("42");

        let report = session.finalize();
        assert!(report.is_partial());
        assert_eq!(report.failed_pages[0].page, 2);
        assert_eq!(report.stats.failed_page_count, 1);
        assert_eq!(report.stats.failed_thread_count, 1);
    }

    #[test]
    fn test_stats() {
        let mut records = vec![record("1", 1, 10), record("2", 1, 0), record("3", 2, 5)];
        records[0].created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        records[2].created_at = Utc.timestamp_opt(1_700_100_000, 0).unwrap();
        records[2].parent_id = Some("1".into());

        let stats = HarvestStats::from_records(&records);
        assert_eq!(stats.record_count, 3);
        assert_eq!(stats.reply_count, 1);
        assert_eq!(stats.distinct_authors, 2);
        assert_eq!(stats.top_commenters[0].author_id, 1);
        assert_eq!(stats.top_commenters[0].comments, 2);

        let likes = stats.likes.as_ref().unwrap();
        assert_eq!(likes.min, 0);
        assert_eq!(likes.max, 10);
        assert_eq!(likes.total, 15);
        assert!((likes.mean - 5.0).abs() < 1e-9);
        assert!((likes.median - 5.0).abs() < 1e-9);

        assert_eq!(stats.earliest.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(stats.latest.unwrap().timestamp(), 1_700_100_000);
        assert!((stats.reply_ratio() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats() {
        let stats = HarvestStats::from_records(&[]);
        assert_eq!(stats.record_count, 0);
        assert!(stats.likes.is_none());
        assert!(stats.earliest.is_none());
        assert_eq!(stats.reply_ratio(), 0.0);
    }
}
