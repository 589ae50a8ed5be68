//! Unified error handling for the pinglun crate
//!
//! This module provides a unified error type that consolidates the
//! domain-specific errors into a single `Error` enum, while keeping the
//! domain-specific errors available where callers need to match on them.
//!
//! # Architecture
//!
//! - [`PinglunErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use pinglun::error::{Error, PinglunErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Will retry: {}", err.describe());
//!     } else {
//!         eprintln!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::utils::error::{FetchError, HarvestError, VariantFailure};

/// Common trait for all pinglun error types
pub trait PinglunErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Short description for user-facing messages
    fn describe(&self) -> String;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, rate limit, endpoint rejection)
    Network,
    /// Response parsing and normalization errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Errors that end the whole harvesting session
    Session,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Human-readable label for the category
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "network error",
            Self::Parsing => "parsing error",
            Self::Storage => "storage error",
            Self::Config => "configuration error",
            Self::Session => "session error",
            Self::Other => "other error",
        }
    }
}

/// Unified error type for the pinglun crate
#[derive(Error, Debug)]
pub enum Error {
    /// Harvest errors (fallback chain, normalization, session)
    #[error("Harvest error: {0}")]
    Harvest(#[from] HarvestError),

    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PinglunErrorTrait for HarvestError {
    fn is_recoverable(&self) -> bool {
        self.is_transient()
    }

    fn describe(&self) -> String {
        match self {
            Self::Fetch(e) => format!("transport failure: {e}"),
            Self::MalformedResponse { endpoint, .. } => {
                format!("endpoint {endpoint} returned an unparseable body")
            }
            Self::EndpointRejected { endpoint, code, .. } => {
                format!("endpoint {endpoint} rejected the request with code {code}")
            }
            Self::NoViableEndpoint { failures } => {
                format!("all {} endpoint variant(s) failed", failures.len())
            }
            Self::RecordParse { index, .. } => format!("record {index} skipped"),
            Self::SessionAbort(reason) => format!("harvest aborted: {reason}"),
            Self::Cancelled => "harvest interrupted".to_string(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) | Self::EndpointRejected { .. } | Self::NoViableEndpoint { .. } => {
                ErrorCategory::Network
            }
            Self::MalformedResponse { .. } | Self::RecordParse { .. } => ErrorCategory::Parsing,
            Self::SessionAbort(_) | Self::Cancelled => ErrorCategory::Session,
        }
    }
}

impl PinglunErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Harvest(e) => e.is_recoverable(),
            Self::Fetch(e) => e.is_transient(),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Harvest(e) => e.describe(),
            Self::Fetch(e) => format!("{}: {e}", ErrorCategory::Network.label()),
            Self::Io(e) => format!("{}: {e}", ErrorCategory::Storage.label()),
            Self::Json(e) => format!("{}: {e}", ErrorCategory::Parsing.label()),
            Self::Config(msg) => format!("{}: {msg}", ErrorCategory::Config.label()),
            Self::Other { context, .. } => context.clone(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Harvest(e) => e.category(),
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
