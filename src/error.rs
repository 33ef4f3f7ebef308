//! Error types for the merge-combine engine.
//!
//! Every failure inside the engine is expressed as a [`MergeError`]. The
//! same error value is observed by many parties (the cancellation token,
//! one or more queues, and finally the caller), so the type is `Clone` and
//! carries upstream causes as rendered strings rather than boxed sources.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type MergeResult<T> = Result<T, MergeError>;

/// Error taxonomy for a merge-combine invocation.
///
/// A stream that has returned an error stays errored: every subsequent pull
/// observes the same value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// An input sequence failed while producing a row.
    #[error("input sequence failed: {0}")]
    Source(String),
    /// An engine invariant was violated (for example, a non-monotone
    /// input). Always fatal; never retried.
    #[error("merge invariant violated: {0}")]
    Internal(&'static str),
    /// The query deadline expired on a queue operation or cursor
    /// initialization.
    #[error("query deadline exceeded")]
    Timeout,
    /// The invocation was cancelled before completion.
    #[error("merge cancelled")]
    Cancelled,
    /// The user-supplied reducer failed.
    #[error("reducer failed: {0}")]
    Reduce(String),
}

impl MergeError {
    /// Wraps an upstream source failure.
    pub fn source(cause: impl std::fmt::Display) -> Self {
        Self::Source(cause.to_string())
    }

    /// Wraps a reducer failure.
    pub fn reduce(cause: impl std::fmt::Display) -> Self {
        Self::Reduce(cause.to_string())
    }

    /// Returns true if this error is a cooperative-shutdown signal
    /// (cancellation or deadline expiry) rather than a data-path failure.
    #[must_use]
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled)
    }
}
