//! pinglun - Resilient comment harvester for Bilibili and Weibo
//!
//! Collects the public comment stream of a video or post, including one level
//! of nested replies, from unofficial JSON endpoints that change shape without
//! notice. Every logical operation is backed by an ordered list of endpoint
//! variants, each page is retried with jittered delays, and partial failures
//! are recorded instead of aborting the run.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - Transport, endpoint fallback, pagination and orchestration
//! - [`models`] - Core data structures and types
//! - [`storage`] - Deduplication, session bookkeeping and file output
//! - [`error`] - Unified error handling
//! - [`utils`] - Retry helpers and common utilities
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pinglun::config::Config;
//! use pinglun::crawler::{parse_target, Harvester, HttpTransport, Platform};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let target = parse_target("BV1xx411c7mD", None)?;
//!     let transport = Arc::new(HttpTransport::new(Platform::Bilibili, 2)?);
//!     let harvester = Harvester::new(&config, Platform::Bilibili, transport);
//!     let report = harvester.run(&target).await?;
//!     println!("{} comments", report.records.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod models;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{parse_target, Harvester, HttpTransport, Platform, Target, TargetRef};
    pub use crate::error::{Error, ErrorCategory, PinglunErrorTrait, Result};
    pub use crate::models::{CommentRecord, SortMode};
    pub use crate::storage::{FileSink, HarvestReport, OutputFormat};
}

// Direct re-exports for convenience
pub use models::{CommentRecord, SortMode};
