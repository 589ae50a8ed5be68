//! Nested reply expansion
//!
//! Top-level comments that declare replies are queued as sub-threads. The
//! queue is drained after each top-level page, one thread at a time, using
//! the same pagination machinery with the per-thread page quota. Nesting is
//! one level deep: replies are never expanded further.

use std::collections::{HashSet, VecDeque};

use crate::config::HarvestConfig;
use crate::crawler::pagination::{Paginator, StopReason, ThreadSpec};
use crate::models::{CommentRecord, ThreadKey};
use crate::storage::HarvestSession;

/// Work queue of reply threads waiting to be fetched
#[derive(Debug, Default)]
pub struct ReplyExpander {
    queue: VecDeque<ThreadSpec>,
    queued_roots: HashSet<String>,
}

impl ReplyExpander {
    /// Create an empty expander
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue every top-level record in `records` that declares replies
    ///
    /// Roots already queued in this session are ignored, as are roots whose
    /// id was synthesized from the body, since the reply API cannot address
    /// them. Returns how many threads were added.
    pub fn enqueue(
        &mut self,
        target_id: &str,
        records: &[CommentRecord],
        config: &HarvestConfig,
    ) -> usize {
        let before = self.queue.len();

        for root in records
            .iter()
            .filter(|r| r.is_top_level() && r.has_replies() && !r.has_synthetic_id())
        {
            if self.queued_roots.insert(root.id.clone()) {
                self.queue.push_back(ThreadSpec::replies(target_id, root, config));
            }
        }

        self.queue.len() - before
    }

    /// Threads waiting to be fetched
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Fetch every queued thread into `session`
    ///
    /// A failing thread never affects its siblings. Returns false if the
    /// harvest was cancelled before the queue emptied.
    pub async fn drain(&mut self, paginator: &Paginator<'_>, session: &mut HarvestSession) -> bool {
        while let Some(spec) = self.queue.pop_front() {
            let key = spec.key.clone();
            let ThreadKey::Replies(root_id) = &key else {
                continue;
            };
            let root_id = root_id.clone();

            let outcome = paginator.run(spec).await;
            if outcome.stop == StopReason::Cancelled && outcome.pages_fetched == 0 {
                return false;
            }

            let fetched = outcome.records.len();
            let added = session.ingest_replies(&root_id, outcome.records);
            session.mark_pages_fetched(outcome.pages_fetched, outcome.skipped_records);
            session.mark_thread_expanded();

            for (page, error) in &outcome.failed_pages {
                session.mark_failed_page(key.clone(), *page, error);
            }
            if fetched == 0 && !outcome.failed_pages.is_empty() {
                session.mark_failed_thread(&root_id);
            }

            tracing::debug!(
                root = %root_id,
                fetched,
                added,
                pages = outcome.pages_fetched,
                stop = %outcome.stop,
                "Expanded reply thread"
            );

            if outcome.stop == StopReason::Cancelled {
                return false;
            }
        }

        true
    }
}
