//! Shared cancellation token for one merge-combine invocation.
//!
//! Cancellation is cooperative: a single write-once token is shared by
//! every task of a query and observed at batch boundaries and on every
//! queue operation. The token records the *first* reason it was cancelled
//! with; later cancel calls are no-ops, so the original failure always
//! survives to the caller.

use crate::error::{MergeError, MergeResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single-shot, many-reader cancellation token.
///
/// Cloning is cheap; all clones observe the same state. The fast path
/// (`is_cancelled`) is a single atomic load.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    /// Written exactly once, before `cancelled` is published.
    reason: Mutex<Option<MergeError>>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with the given reason.
    ///
    /// Only the first call takes effect; the reason of later calls is
    /// discarded. Returns true if this call won the race.
    pub fn cancel(&self, reason: MergeError) -> bool {
        let mut slot = self.inner.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        // Publish after the reason is in place so any reader that sees the
        // flag also finds the reason.
        self.inner.cancelled.store(true, Ordering::Release);
        true
    }

    /// Returns true once the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns the recorded reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<MergeError> {
        if !self.is_cancelled() {
            return None;
        }
        self.inner.reason.lock().clone()
    }

    /// Returns the error a cancelled observer should propagate.
    ///
    /// Falls back to [`MergeError::Cancelled`] if called on a token whose
    /// reason has not been published yet.
    #[must_use]
    pub fn error(&self) -> MergeError {
        self.reason().unwrap_or(MergeError::Cancelled)
    }

    /// Errors with the recorded reason if the token has fired.
    pub fn check(&self) -> MergeResult<()> {
        if self.is_cancelled() {
            Err(self.error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);
        assert!(token.check().is_ok());
    }

    #[test]
    fn first_reason_wins() {
        let token = CancelToken::new();
        assert!(token.cancel(MergeError::Timeout));
        assert!(!token.cancel(MergeError::Cancelled));
        assert_eq!(token.reason(), Some(MergeError::Timeout));
        assert_eq!(token.error(), MergeError::Timeout);
        assert_eq!(token.check(), Err(MergeError::Timeout));
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let peer = token.clone();
        token.cancel(MergeError::source("boom"));
        assert!(peer.is_cancelled());
        assert_eq!(peer.error(), MergeError::Source("boom".into()));
    }

    #[test]
    fn concurrent_cancel_records_exactly_one_reason() {
        let token = CancelToken::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let token = token.clone();
            handles.push(std::thread::spawn(move || {
                token.cancel(MergeError::Source(format!("racer {i}")))
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().expect("no panic")))
            .sum();
        assert_eq!(wins, 1);
        assert!(token.reason().is_some());
    }
}
