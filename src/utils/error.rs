//! Error types for the pinglun harvester
//!
//! This module defines the transport-level and harvest-level error types
//! used throughout the application.

use thiserror::Error;

/// Errors that can occur during HTTP transport operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether another attempt could reasonably succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimit | Self::Timeout => true,
            Self::ServerError(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::InvalidUrl(_) => false,
        }
    }
}

/// Failure of a single endpoint variant inside the fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantFailure {
    /// Endpoint variant name
    pub endpoint: String,

    /// Human-readable failure reason
    pub reason: String,
}

impl std::fmt::Display for VariantFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.reason)
    }
}

/// Errors raised while harvesting a comment stream
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Transport failure (connection, timeout, non-2xx)
    #[error("Transport error: {0}")]
    Fetch(#[from] FetchError),

    /// Body could not be parsed as structured data
    #[error("Malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    /// Body parsed, but its embedded status reports failure
    #[error("Endpoint {endpoint} rejected request (code {code}): {message}")]
    EndpointRejected {
        endpoint: String,
        code: i64,
        message: String,
    },

    /// Every configured endpoint variant failed for one request
    #[error("No viable endpoint after {} variant(s): {}", .failures.len(), join_failures(.failures))]
    NoViableEndpoint { failures: Vec<VariantFailure> },

    /// One reply entry could not be normalized
    #[error("Unparseable record at index {index}: {reason}")]
    RecordParse { index: usize, reason: String },

    /// The whole run is invalid (e.g. the target cannot be resolved)
    #[error("Session aborted: {0}")]
    SessionAbort(String),

    /// The run was interrupted before the request was issued
    #[error("Harvest cancelled")]
    Cancelled,
}

impl HarvestError {
    /// Whether the retry policy should attempt the operation again
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::MalformedResponse { .. }
            | Self::EndpointRejected { .. }
            | Self::NoViableEndpoint { .. } => true,
            Self::RecordParse { .. } | Self::SessionAbort(_) | Self::Cancelled => false,
        }
    }
}

fn join_failures(failures: &[VariantFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_transience() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::ServerError(503).is_transient());
        assert!(FetchError::ServerError(429).is_transient());
        assert!(!FetchError::ServerError(404).is_transient());
        assert!(!FetchError::InvalidUrl("x".into()).is_transient());
    }

    #[test]
    fn test_no_viable_endpoint_message() {
        let err = HarvestError::NoViableEndpoint {
            failures: vec![
                VariantFailure {
                    endpoint: "main".into(),
                    reason: "status 412".into(),
                },
                VariantFailure {
                    endpoint: "legacy".into(),
                    reason: "code -400".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 variant(s)"));
        assert!(msg.contains("main: status 412"));
        assert!(msg.contains("legacy: code -400"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_session_abort_is_not_transient() {
        assert!(!HarvestError::SessionAbort("bad target".into()).is_transient());
        assert!(!HarvestError::Cancelled.is_transient());
    }
}
