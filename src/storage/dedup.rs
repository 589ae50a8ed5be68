//! In-memory deduplication and aggregation
//!
//! Records from top-level pages and reply sub-threads flow into one
//! [`CommentStore`]. The first occurrence of a key wins; later duplicates are
//! counted and dropped. Identifiers are never allowed to repeat in the
//! collection, whichever key strategy is active.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::models::CommentRecord;

// ============================================================================
// Key Strategy
// ============================================================================

/// How duplicate records are recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// Source identifier when present and genuine, content hash otherwise
    #[default]
    Identity,
    /// Normalized content hash for every record
    Content,
}

impl FromStr for DedupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity" | "id" => Ok(Self::Identity),
            "content" | "hash" => Ok(Self::Content),
            other => Err(format!("unknown dedup strategy: {other}")),
        }
    }
}

impl DedupStrategy {
    /// Key under which `record` is remembered
    pub fn key(&self, record: &CommentRecord) -> String {
        match self {
            Self::Identity if !record.id.is_empty() && !record.has_synthetic_id() => {
                format!("id:{}", record.id)
            }
            _ => format!("hash:{}", record.content_hash()),
        }
    }
}

// ============================================================================
// Comment Store
// ============================================================================

/// Accumulates unique records in arrival order
#[derive(Debug, Clone, Default)]
pub struct CommentStore {
    strategy: DedupStrategy,
    seen_keys: HashSet<String>,
    seen_ids: HashSet<String>,
    records: Vec<CommentRecord>,
    duplicates: usize,
}

impl CommentStore {
    /// Create an empty store
    pub fn new(strategy: DedupStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Insert a record, returning false if it was a duplicate
    pub fn insert(&mut self, record: CommentRecord) -> bool {
        let key = self.strategy.key(&record);

        if self.seen_keys.contains(&key) || self.seen_ids.contains(&record.id) {
            self.duplicates += 1;
            tracing::trace!(id = %record.id, "Dropping duplicate record");
            return false;
        }

        self.seen_keys.insert(key);
        self.seen_ids.insert(record.id.clone());
        self.records.push(record);
        true
    }

    /// Insert many records, returning how many were new
    pub fn extend<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = CommentRecord>,
    {
        records
            .into_iter()
            .map(|r| self.insert(r))
            .filter(|inserted| *inserted)
            .count()
    }

    /// Whether a record with this identifier is already stored
    pub fn contains_id(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    /// Records in arrival order
    pub fn records(&self) -> &[CommentRecord] {
        &self.records
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Duplicates dropped so far
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Active key strategy
    pub fn strategy(&self) -> DedupStrategy {
        self.strategy
    }

    /// Consume the store, yielding the records
    pub fn into_records(self) -> Vec<CommentRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::synthetic_id;

    #[test]
    fn test_identity_dedup_keeps_first() {
        let mut store = CommentStore::new(DedupStrategy::Identity);
        let mut first = CommentRecord::new("1", "first body");
        first.like_count = 5;
        let second = CommentRecord::new("1", "edited body");

        assert!(store.insert(first));
        assert!(!store.insert(second));
        assert_eq!(store.len(), 1);
        assert_eq!(store.duplicates(), 1);
        assert_eq!(store.records()[0].like_count, 5);
    }

    #[test]
    fn test_identity_allows_same_text_with_distinct_ids() {
        let mut store = CommentStore::new(DedupStrategy::Identity);
        assert!(store.insert(CommentRecord::new("1", "哈哈哈")));
        assert!(store.insert(CommentRecord::new("2", "哈哈哈")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_synthetic_ids_fall_back_to_hash() {
        let mut store = CommentStore::new(DedupStrategy::Identity);
        let body = "没有编号";
        assert!(store.insert(CommentRecord::new(synthetic_id(body), body)));
        assert!(!store.insert(CommentRecord::new(synthetic_id(body), "没有编号 ")));
        assert_eq!(store.duplicates(), 1);
    }

    #[test]
    fn test_content_strategy() {
        let mut store = CommentStore::new(DedupStrategy::Content);
        assert!(store.insert(CommentRecord::new("1", "同样的话")));
        assert!(!store.insert(CommentRecord::new("2", "同样的话")));
        // Ids stay unique even when bodies differ
        assert!(!store.insert(CommentRecord::new("1", "不同的话")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.duplicates(), 2);
    }

    #[test]
    fn test_extend_counts_new_records() {
        let mut store = CommentStore::new(DedupStrategy::Identity);
        let added = store.extend(vec![
            CommentRecord::new("1", "a"),
            CommentRecord::new("2", "b"),
            CommentRecord::new("1", "a"),
        ]);
        assert_eq!(added, 2);
        assert!(store.contains_id("2"));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("content".parse::<DedupStrategy>().unwrap(), DedupStrategy::Content);
        assert_eq!("ID".parse::<DedupStrategy>().unwrap(), DedupStrategy::Identity);
        assert!("fuzzy".parse::<DedupStrategy>().is_err());
    }
}
