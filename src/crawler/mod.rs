//! Comment harvesting with endpoint fallback and rate limiting
//!
//! This module implements the fetching side of the crate: the HTTP transport,
//! platform endpoint catalogs, response normalization, pagination and the
//! session orchestration that ties them together.
//!
//! # Layout
//!
//! - [`transport`] - the transport seam and its rate-limited HTTP implementation
//! - [`endpoint`] - endpoint variants and the ordered fallback chain
//! - [`normalize`] - platform response shapes to [`CommentRecord`](crate::models::CommentRecord)
//! - [`pagination`] - per-thread paging and termination decisions
//! - [`expander`] - queue of reply threads fetched after each top-level page
//! - [`harvester`] - one session per target
//! - [`platform`] - target parsing, resolution and default endpoint catalogs

pub mod endpoint;
pub mod expander;
pub mod harvester;
pub mod headers;
pub mod normalize;
pub mod pagination;
pub mod platform;
pub mod transport;

pub use endpoint::{EndpointVariant, FallbackChain, Paging, SortParam};
pub use harvester::Harvester;
pub use pagination::{Paginator, PagingPolicy, StopReason, ThreadSpec};
pub use platform::{parse_target, Platform, Target, TargetRef};
pub use transport::{HttpTransport, QueryParams, RawResponse, Transport};
