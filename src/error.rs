//! Error taxonomy for the orchestrator and its backends.
//!
//! Only [`QueryError`] ever reaches a caller. Adapter and cache failures are
//! recovered inside the orchestrator and surface as diagnostics
//! (`sources_failed`, log lines) rather than as request failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of an orchestrated request as a whole.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed input, rejected before any adapter is contacted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A programming defect (e.g. a broken ranking invariant).
    #[error("internal orchestrator error: {0}")]
    Internal(String),
}

/// Failure reported by (or on behalf of) a single backend adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("query rejected by backend: {0}")]
    InvalidQuery(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The adapter task panicked or was cancelled unexpectedly.
    #[error("adapter task failed: {0}")]
    Internal(String),
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unreachable(_) => ErrorKind::Unreachable,
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Compact failure classification recorded per source in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Unreachable,
    InvalidQuery,
    Unauthorized,
    ValidationFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
            Self::InvalidQuery => "invalid_query",
            Self::Unauthorized => "unauthorized",
            Self::ValidationFailed => "validation_failed",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result cache could not be read or written. Never fails a request.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}
