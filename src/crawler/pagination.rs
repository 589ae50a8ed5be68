//! Pagination controller
//!
//! Walks one thread (the top-level stream or a reply sub-thread) page by
//! page. Each page is fetched through the fallback chain under the retry
//! policy, normalized, and then a stop decision is taken from the strongest
//! signal available:
//!
//! 1. an explicit end-of-stream flag
//! 2. an empty page
//! 3. a known total item count giving an exact page ceiling
//! 4. for reply threads, a page shorter than the requested size
//! 5. the configured page ceiling
//!
//! A page that exhausts its retries is recorded as failed and the walk
//! advances to the next page. Pages of one thread are strictly sequential.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::HarvestConfig;
use crate::crawler::endpoint::FallbackChain;
use crate::crawler::normalize::normalize_page;
use crate::models::{CommentRecord, NormalizedPage, PageRequest, SortMode, ThreadKey};
use crate::utils::error::HarvestError;
use crate::utils::retry::{jitter_sleep, with_retry, RetryConfig};

// ============================================================================
// Thread Specification
// ============================================================================

/// Static description of one paginated thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSpec {
    /// Thread identity
    pub key: ThreadKey,

    /// Target identifier
    pub target_id: String,

    /// Requested page size
    pub page_size: u32,

    /// Hard page ceiling
    pub max_pages: u32,

    /// Requested ordering
    pub sort: SortMode,

    /// Item count known before the first page (a root's declared replies)
    pub known_total: Option<u64>,

    /// Stop as soon as a page returns fewer items than requested
    pub stop_on_short_page: bool,
}

impl ThreadSpec {
    /// Top-level stream of a target
    pub fn top_level(target_id: &str, config: &HarvestConfig) -> Self {
        Self {
            key: ThreadKey::TopLevel,
            target_id: target_id.to_string(),
            page_size: config.page_size,
            max_pages: config.max_top_level_pages,
            sort: config.sort_mode,
            known_total: None,
            stop_on_short_page: false,
        }
    }

    /// Reply sub-thread under `root`
    pub fn replies(target_id: &str, root: &CommentRecord, config: &HarvestConfig) -> Self {
        Self {
            key: ThreadKey::Replies(root.id.clone()),
            target_id: target_id.to_string(),
            page_size: config.reply_page_size,
            max_pages: config.max_sub_pages_per_thread,
            sort: config.sort_mode,
            known_total: Some(root.reply_count),
            stop_on_short_page: true,
        }
    }

    fn root_id(&self) -> Option<String> {
        match &self.key {
            ThreadKey::TopLevel => None,
            ThreadKey::Replies(root) => Some(root.clone()),
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Why a thread stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The server flagged the last page
    EndSignal,
    /// A page came back with no entries
    EmptyPage,
    /// The known total has been covered
    TotalReached,
    /// A reply page was shorter than requested
    ShortPage,
    /// The configured page ceiling was reached
    PageCeiling,
    /// The next page needs a cursor that is not available
    CursorExhausted,
    /// Too many consecutive pages failed
    TooManyFailures,
    /// The harvest was interrupted
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EndSignal => "end signal",
            Self::EmptyPage => "empty page",
            Self::TotalReached => "total reached",
            Self::ShortPage => "short page",
            Self::PageCeiling => "page ceiling",
            Self::CursorExhausted => "cursor exhausted",
            Self::TooManyFailures => "too many failures",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of the deciding step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Done(StopReason),
}

/// Decide whether to fetch another page after `page` was normalized
pub fn decide(
    spec: &ThreadSpec,
    page: u32,
    result: &NormalizedPage,
    known_total: Option<u64>,
) -> Decision {
    if result.signal.is_end == Some(true) {
        return Decision::Done(StopReason::EndSignal);
    }

    if result.raw_count == 0 {
        return Decision::Done(StopReason::EmptyPage);
    }

    // An explicit "more pages" flag outranks the count heuristic
    if result.signal.is_end.is_none() {
        if let Some(total) = known_total {
            let ceiling = total.div_ceil(u64::from(spec.page_size.max(1)));
            if u64::from(page) >= ceiling {
                return Decision::Done(StopReason::TotalReached);
            }
        }
    }

    if spec.stop_on_short_page && result.raw_count < spec.page_size as usize {
        return Decision::Done(StopReason::ShortPage);
    }

    if page >= spec.max_pages {
        return Decision::Done(StopReason::PageCeiling);
    }

    Decision::Continue
}

// ============================================================================
// Thread State
// ============================================================================

/// Mutable position within one thread
#[derive(Debug, Clone)]
pub struct ThreadState {
    spec: ThreadSpec,
    page: u32,
    cursor: Option<String>,
    known_total: Option<u64>,
    consecutive_failures: u32,
    stop: Option<StopReason>,
}

impl ThreadState {
    fn new(spec: ThreadSpec) -> Self {
        let known_total = spec.known_total;
        let stop = (spec.max_pages == 0).then_some(StopReason::PageCeiling);
        Self {
            spec,
            page: 1,
            cursor: None,
            known_total,
            consecutive_failures: 0,
            stop,
        }
    }

    /// Thread being walked
    pub fn spec(&self) -> &ThreadSpec {
        &self.spec
    }

    /// Next page to request
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Why the thread stopped, once it has
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    fn request(&self) -> PageRequest {
        PageRequest {
            target_id: self.spec.target_id.clone(),
            root_id: self.spec.root_id(),
            page: self.page,
            cursor: self.cursor.clone(),
            page_size: self.spec.page_size,
            sort: self.spec.sort,
        }
    }
}

/// Result of one step of a thread
#[derive(Debug)]
pub enum PageOutcome {
    /// The page was fetched and normalized
    Fetched {
        page: u32,
        endpoint: String,
        result: NormalizedPage,
    },
    /// The page exhausted its retries
    Failed { page: u32, error: HarvestError },
}

/// Everything a fully walked thread produced
#[derive(Debug)]
pub struct ThreadOutcome {
    pub key: ThreadKey,
    pub records: Vec<CommentRecord>,
    pub pages_fetched: u32,
    pub skipped_records: usize,
    pub failed_pages: Vec<(u32, String)>,
    pub stop: StopReason,
}

// ============================================================================
// Paginator
// ============================================================================

/// Retry and failure limits shared by every thread of a session
#[derive(Debug, Clone)]
pub struct PagingPolicy {
    /// Attempts per page and the pause between requests
    pub retry: RetryConfig,

    /// Consecutive failed pages after which a thread is abandoned (0 = never)
    pub max_consecutive_failures: u32,
}

impl PagingPolicy {
    /// Build from the harvest configuration
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            retry: config.retry_config(),
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

/// Drives threads through one fallback chain
pub struct Paginator<'a> {
    chain: &'a FallbackChain,
    policy: &'a PagingPolicy,
    cancel: &'a AtomicBool,
}

impl<'a> Paginator<'a> {
    /// Create a paginator over `chain`
    pub fn new(chain: &'a FallbackChain, policy: &'a PagingPolicy, cancel: &'a AtomicBool) -> Self {
        Self {
            chain,
            policy,
            cancel,
        }
    }

    /// Begin walking a thread
    pub fn start(&self, spec: ThreadSpec) -> ThreadState {
        ThreadState::new(spec)
    }

    /// Fetch, normalize and decide on the next page of `state`
    ///
    /// Returns `None` once the thread is done.
    pub async fn next_page(&self, state: &mut ThreadState) -> Option<PageOutcome> {
        if state.stop.is_some() {
            return None;
        }
        if self.cancel.load(Ordering::SeqCst) {
            state.stop = Some(StopReason::Cancelled);
            return None;
        }

        let request = state.request();
        let page = request.page;
        let request = &request;
        let chain = self.chain;
        let cancel = self.cancel;

        tracing::debug!(thread = %state.spec.key, page, "Fetching page");

        let result = with_retry(&self.policy.retry, || async move {
            if cancel.load(Ordering::SeqCst) {
                return Err(HarvestError::Cancelled);
            }
            let fetched = chain.fetch(request).await?;
            let normalized = normalize_page(&fetched.body, &fetched.endpoint)?;
            Ok((fetched.endpoint, normalized))
        })
        .await;

        let outcome = match result {
            Ok((endpoint, normalized)) => {
                self.advance_after_success(state, page, &normalized);
                PageOutcome::Fetched {
                    page,
                    endpoint,
                    result: normalized,
                }
            }
            Err(HarvestError::Cancelled) => {
                state.stop = Some(StopReason::Cancelled);
                return None;
            }
            Err(error) => {
                tracing::warn!(
                    thread = %state.spec.key,
                    page,
                    error = %error,
                    "Page failed after retries, moving on"
                );
                self.advance_after_failure(state, page);
                PageOutcome::Failed { page, error }
            }
        };

        if let Some(reason) = state.stop {
            tracing::debug!(thread = %state.spec.key, page, reason = %reason, "Thread finished");
        } else {
            jitter_sleep(&self.policy.retry.delay).await;
        }

        Some(outcome)
    }

    fn advance_after_success(&self, state: &mut ThreadState, page: u32, result: &NormalizedPage) {
        state.consecutive_failures = 0;
        if let Some(total) = result.signal.total_count {
            state.known_total = Some(total);
        }
        state.cursor = result.signal.next_cursor.clone();

        match decide(&state.spec, page, result, state.known_total) {
            Decision::Done(reason) => state.stop = Some(reason),
            Decision::Continue => {
                state.page += 1;
                if state.cursor.is_none() && !self.chain.supports_page_index() {
                    state.stop = Some(StopReason::CursorExhausted);
                }
            }
        }
    }

    fn advance_after_failure(&self, state: &mut ThreadState, page: u32) {
        state.consecutive_failures += 1;
        let limit = self.policy.max_consecutive_failures;

        state.stop = if limit > 0 && state.consecutive_failures >= limit {
            Some(StopReason::TooManyFailures)
        } else if page >= state.spec.max_pages {
            Some(StopReason::PageCeiling)
        } else if !self.chain.supports_page_index() {
            // The next cursor would have come from the failed page
            Some(StopReason::CursorExhausted)
        } else {
            state.page += 1;
            state.cursor = None;
            None
        };
    }

    /// Walk a whole thread, collecting its records
    pub async fn run(&self, spec: ThreadSpec) -> ThreadOutcome {
        let mut state = self.start(spec);
        let mut outcome = ThreadOutcome {
            key: state.spec.key.clone(),
            records: Vec::new(),
            pages_fetched: 0,
            skipped_records: 0,
            failed_pages: Vec::new(),
            stop: StopReason::EndSignal,
        };

        while let Some(step) = self.next_page(&mut state).await {
            match step {
                PageOutcome::Fetched { result, .. } => {
                    outcome.pages_fetched += 1;
                    outcome.skipped_records += result.skipped;
                    outcome.records.extend(result.records);
                }
                PageOutcome::Failed { page, error } => {
                    outcome.failed_pages.push((page, error.to_string()));
                }
            }
        }

        outcome.stop = state.stop.unwrap_or(StopReason::EndSignal);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TerminationSignal;

    fn spec(page_size: u32, max_pages: u32, short: bool) -> ThreadSpec {
        ThreadSpec {
            key: ThreadKey::TopLevel,
            target_id: "1".into(),
            page_size,
            max_pages,
            sort: SortMode::Time,
            known_total: None,
            stop_on_short_page: short,
        }
    }

    fn page(raw_count: usize, is_end: Option<bool>) -> NormalizedPage {
        NormalizedPage {
            records: Vec::new(),
            raw_count,
            skipped: 0,
            signal: TerminationSignal {
                is_end,
                total_count: None,
                next_cursor: None,
            },
        }
    }

    #[test]
    fn test_end_signal_wins() {
        let d = decide(&spec(20, 100, false), 1, &page(20, Some(true)), Some(1000));
        assert_eq!(d, Decision::Done(StopReason::EndSignal));
    }

    #[test]
    fn test_empty_page_stops() {
        let d = decide(&spec(20, 100, false), 4, &page(0, Some(false)), None);
        assert_eq!(d, Decision::Done(StopReason::EmptyPage));
    }

    #[test]
    fn test_total_count_ceiling() {
        let s = spec(20, 100, false);
        assert_eq!(decide(&s, 1, &page(20, None), Some(45)), Decision::Continue);
        assert_eq!(decide(&s, 2, &page(20, None), Some(45)), Decision::Continue);
        assert_eq!(
            decide(&s, 3, &page(5, None), Some(45)),
            Decision::Done(StopReason::TotalReached)
        );
    }

    #[test]
    fn test_explicit_continue_overrides_total() {
        let s = spec(20, 100, false);
        assert_eq!(decide(&s, 3, &page(20, Some(false)), Some(45)), Decision::Continue);
    }

    #[test]
    fn test_short_page_only_for_reply_threads() {
        assert_eq!(
            decide(&spec(10, 10, true), 1, &page(4, None), None),
            Decision::Done(StopReason::ShortPage)
        );
        assert_eq!(decide(&spec(20, 10, false), 1, &page(4, None), None), Decision::Continue);
    }

    #[test]
    fn test_page_ceiling() {
        assert_eq!(
            decide(&spec(20, 2, false), 2, &page(20, Some(false)), None),
            Decision::Done(StopReason::PageCeiling)
        );
    }

    #[test]
    fn test_reply_spec_uses_declared_count() {
        let mut root = CommentRecord::new("42", "root");
        root.reply_count = 12;
        let config = HarvestConfig::default();
        let spec = ThreadSpec::replies("1", &root, &config);

        assert_eq!(spec.key, ThreadKey::Replies("42".into()));
        assert_eq!(spec.known_total, Some(12));
        assert_eq!(spec.page_size, config.reply_page_size);
        assert_eq!(spec.max_pages, config.max_sub_pages_per_thread);
        assert!(spec.stop_on_short_page);
        assert_eq!(spec.root_id().as_deref(), Some("42"));
    }
}
