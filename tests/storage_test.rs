//! Property and persistence tests for comment aggregation

use proptest::prelude::*;
use std::collections::HashSet;
use tempfile::TempDir;

use pinglun::crawler::{Platform, Target};
use pinglun::models::CommentRecord;
use pinglun::storage::{CommentStore, DedupStrategy, FileSink, HarvestSession, OutputFormat};

fn record(id: u8, body: u8) -> CommentRecord {
    CommentRecord::new(id.to_string(), format!("body {body}"))
}

proptest! {
    /// Whatever arrives, stored ids stay unique and every input is accounted for
    #[test]
    fn store_keeps_ids_unique(
        pairs in prop::collection::vec((0u8..30, 0u8..10), 0..200),
        by_content in any::<bool>(),
    ) {
        let strategy = if by_content { DedupStrategy::Content } else { DedupStrategy::Identity };
        let mut store = CommentStore::new(strategy);
        let added = store.extend(pairs.iter().map(|(id, body)| record(*id, *body)));

        let ids: HashSet<_> = store.records().iter().map(|r| r.id.clone()).collect();
        prop_assert_eq!(ids.len(), store.len());
        prop_assert_eq!(added, store.len());
        prop_assert_eq!(store.len() + store.duplicates(), pairs.len());
    }

    /// Identity mode keeps exactly one record per distinct id
    #[test]
    fn identity_mode_keeps_one_per_id(ids in prop::collection::vec(0u8..50, 0..100)) {
        let mut store = CommentStore::new(DedupStrategy::Identity);
        store.extend(ids.iter().map(|id| record(*id, *id)));

        let distinct: HashSet<_> = ids.iter().collect();
        prop_assert_eq!(store.len(), distinct.len());
    }
}

#[test]
fn test_session_report_written_in_every_format() {
    let dir = TempDir::new().unwrap();
    let target = Target {
        platform: Platform::Bilibili,
        id: "170001".into(),
        title: Some("测试视频".into()),
    };

    let mut session = HarvestSession::new(target, DedupStrategy::Identity);
    session.ingest(vec![record(1, 1), record(2, 2)]);
    session.ingest_replies("1", vec![record(3, 3)]);
    session.mark_pages_fetched(2, 0);
    let report = session.finalize();

    let sink = FileSink::new(dir.path()).unwrap();
    let paths = sink
        .save_report(&report, &[OutputFormat::Json, OutputFormat::Csv, OutputFormat::Txt])
        .unwrap();

    assert_eq!(paths.len(), 4);
    assert!(paths.iter().all(|p| p.exists()));

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths[3]).unwrap()).unwrap();
    assert_eq!(summary["stats"]["record_count"], 3);
    assert_eq!(summary["stats"]["reply_count"], 1);
    assert_eq!(summary["interrupted"], false);
}
