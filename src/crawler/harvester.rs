//! Session orchestration
//!
//! A [`Harvester`] owns the two fallback chains of a platform (top-level and
//! replies) and runs one [`HarvestSession`] per target: the top-level stream
//! is walked page by page and, after each page, the reply threads it
//! announced are expanded. Partial failures end up in the report; only an
//! unresolvable target aborts the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, HarvestConfig};
use crate::crawler::endpoint::FallbackChain;
use crate::crawler::expander::ReplyExpander;
use crate::crawler::pagination::{PageOutcome, Paginator, PagingPolicy, ThreadSpec};
use crate::crawler::platform::{resolve_target, Platform, Target, TargetRef};
use crate::crawler::transport::Transport;
use crate::models::ThreadKey;
use crate::storage::{HarvestReport, HarvestSession};
use crate::utils::error::HarvestError;

/// Harvests comment streams of one platform
pub struct Harvester {
    config: HarvestConfig,
    platform: Platform,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    top_level: FallbackChain,
    replies: FallbackChain,
    policy: PagingPolicy,
    cancel: Arc<AtomicBool>,
}

impl Harvester {
    /// Create a harvester for `platform`
    ///
    /// Endpoint lists come from the configuration when overridden, from the
    /// platform defaults otherwise.
    pub fn new(config: &Config, platform: Platform, transport: Arc<dyn Transport>) -> Self {
        let timeout = config.request_timeout();
        let top_variants = config
            .endpoints
            .top_level
            .clone()
            .unwrap_or_else(|| platform.default_top_level_endpoints());
        let reply_variants = config
            .endpoints
            .replies
            .clone()
            .unwrap_or_else(|| platform.default_reply_endpoints());

        Self {
            config: config.harvest.clone(),
            platform,
            top_level: FallbackChain::new(top_variants, Arc::clone(&transport), timeout),
            replies: FallbackChain::new(reply_variants, Arc::clone(&transport), timeout),
            transport,
            timeout,
            policy: PagingPolicy::from_config(&config.harvest),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops the harvest before the next request once set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Platform served by this harvester
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Resolve `target` and harvest it
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::SessionAbort`] when the target cannot be
    /// resolved; nothing is fetched in that case.
    pub async fn run(&self, target: &TargetRef) -> Result<HarvestReport, HarvestError> {
        if target.platform() != self.platform {
            return Err(HarvestError::SessionAbort(format!(
                "target belongs to {}, harvester serves {}",
                target.platform(),
                self.platform
            )));
        }

        let target = resolve_target(target, self.transport.as_ref(), self.timeout).await?;
        Ok(self.harvest(target).await)
    }

    /// Harvest an already resolved target
    pub async fn harvest(&self, target: Target) -> HarvestReport {
        let target_id = target.id.clone();
        let label = target.label();

        tracing::info!(
            target = %label,
            max_pages = self.config.max_top_level_pages,
            sort = self.config.sort_mode.as_str(),
            "Starting harvest"
        );

        let mut session = HarvestSession::new(target, self.config.dedup);
        let mut expander = ReplyExpander::new();

        let top = Paginator::new(&self.top_level, &self.policy, &self.cancel);
        let sub = Paginator::new(&self.replies, &self.policy, &self.cancel);

        let mut state = top.start(ThreadSpec::top_level(&target_id, &self.config));

        while let Some(step) = top.next_page(&mut state).await {
            match step {
                PageOutcome::Fetched {
                    page,
                    endpoint,
                    result,
                } => {
                    session.mark_pages_fetched(1, result.skipped);
                    let received = result.records.len();
                    let accepted = session.ingest(result.records);
                    let added = accepted.len();
                    // Only stored roots are expanded, so every reply has its parent
                    if self.config.expand_replies {
                        expander.enqueue(&target_id, accepted, &self.config);
                    }

                    tracing::info!(
                        target = %label,
                        page,
                        endpoint = %endpoint,
                        received,
                        added,
                        total = session.store().len(),
                        "Fetched top-level page"
                    );
                }
                PageOutcome::Failed { page, error } => {
                    session.mark_failed_page(ThreadKey::TopLevel, page, &error.to_string());
                }
            }

            if expander.pending() > 0 && !expander.drain(&sub, &mut session).await {
                break;
            }
        }

        if self.cancel.load(Ordering::SeqCst) {
            tracing::warn!(target = %label, "Harvest interrupted, keeping partial results");
            session.mark_interrupted();
        }

        let report = session.finalize();
        tracing::info!(
            target = %label,
            records = report.stats.record_count,
            duplicates = report.stats.duplicates_removed,
            failed_pages = report.stats.failed_page_count,
            stop = ?state.stop_reason(),
            "Harvest finished"
        );
        report
    }
}
