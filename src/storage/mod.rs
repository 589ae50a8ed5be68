//! Aggregation and persistence of harvested comments
//!
//! This module handles in-memory deduplication, session bookkeeping and the
//! file-based persistence collaborator.

pub mod dedup;
pub mod session;
pub mod sink;

pub use dedup::{CommentStore, DedupStrategy};
pub use session::{
    CommenterCount, FailedPage, HarvestReport, HarvestSession, HarvestStats, LikeSummary,
};
pub use sink::{CommentSink, FileSink, OutputFormat};
