//! Batched read positions over sequences and queues.
//!
//! A cursor owns its source and exposes the current head row for
//! comparison, refilling from the source one batch at a time. The two
//! variants share one observable contract ([`RowCursor`]):
//!
//! - [`SequenceCursor`] pulls up to `batch_size` rows per refill from a
//!   lazy [`Sequence`];
//! - [`QueueCursor`] blocks on a [`BatchQueue`], bounded by an optional
//!   deadline, and finishes when it takes the terminal batch.
//!
//! Initialization is lazy and idempotent: the first refill happens on the
//! thread that first touches the cursor, never at construction. Errors
//! (source failure, timeout, cancellation) are terminal for the cursor.

use crate::error::MergeResult;
use crate::queue::BatchQueue;
use crate::sequence::BoxedSequence;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Uninit,
    Live,
    Done,
    Closed,
}

/// A stateful read position producing rows one at a time.
///
/// `peek` exposes the head for comparisons; `pop` surrenders it and
/// advances. A cursor whose source is exhausted reports `is_done` and
/// peeks `None`.
pub trait RowCursor<T> {
    /// Performs the first refill if it has not happened yet. Idempotent.
    fn init(&mut self) -> MergeResult<()>;

    /// The current head row, or `None` once done.
    fn peek(&self) -> Option<&T>;

    /// Takes the head row and advances, refilling from the source when the
    /// private batch is exhausted.
    fn pop(&mut self) -> MergeResult<Option<T>>;

    /// Returns true once the cursor has delivered its last row.
    fn is_done(&self) -> bool;

    /// Releases the underlying source. Idempotent.
    fn close(&mut self);
}

/// Cursor over a lazy [`Sequence`], batching its pulls.
pub struct SequenceCursor<T> {
    source: Option<BoxedSequence<T>>,
    batch_size: usize,
    head: Option<T>,
    rest: std::vec::IntoIter<T>,
    state: CursorState,
}

impl<T> SequenceCursor<T> {
    /// Creates an uninitialized cursor pulling `batch_size` rows per
    /// refill.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    #[must_use]
    pub fn new(source: BoxedSequence<T>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "cursor batch size must be non-zero");
        Self {
            source: Some(source),
            batch_size,
            head: None,
            rest: Vec::new().into_iter(),
            state: CursorState::Uninit,
        }
    }

    /// Pulls the next private batch from the sequence and reloads `head`.
    fn refill(&mut self) -> MergeResult<()> {
        debug_assert!(self.head.is_none());
        if let Some(row) = self.rest.next() {
            self.head = Some(row);
            return Ok(());
        }
        let Some(source) = self.source.as_mut() else {
            self.state = CursorState::Done;
            return Ok(());
        };
        let mut rows = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            match source.next() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(err) => {
                    self.state = CursorState::Done;
                    self.close();
                    return Err(err);
                }
            }
        }
        if rows.is_empty() {
            self.state = CursorState::Done;
            self.close();
            return Ok(());
        }
        self.rest = rows.into_iter();
        self.head = self.rest.next();
        Ok(())
    }
}

impl<T> RowCursor<T> for SequenceCursor<T> {
    fn init(&mut self) -> MergeResult<()> {
        if self.state != CursorState::Uninit {
            return Ok(());
        }
        self.state = CursorState::Live;
        self.refill()
    }

    fn peek(&self) -> Option<&T> {
        self.head.as_ref()
    }

    fn pop(&mut self) -> MergeResult<Option<T>> {
        self.init()?;
        let Some(row) = self.head.take() else {
            return Ok(None);
        };
        if self.state == CursorState::Live {
            self.refill()?;
        }
        Ok(Some(row))
    }

    fn is_done(&self) -> bool {
        matches!(self.state, CursorState::Done | CursorState::Closed) && self.head.is_none()
    }

    fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        if self.state != CursorState::Done {
            self.state = CursorState::Closed;
        }
        self.head = None;
        self.rest = Vec::new().into_iter();
    }
}

impl<T> Drop for SequenceCursor<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for SequenceCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceCursor")
            .field("batch_size", &self.batch_size)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Cursor over a [`BatchQueue`], honoring a shared deadline.
pub struct QueueCursor<T> {
    queue: Arc<BatchQueue<T>>,
    deadline: Option<Instant>,
    head: Option<T>,
    rest: std::vec::IntoIter<T>,
    state: CursorState,
}

impl<T> QueueCursor<T> {
    /// Creates an uninitialized cursor reading from `queue`.
    #[must_use]
    pub fn new(queue: Arc<BatchQueue<T>>, deadline: Option<Instant>) -> Self {
        Self {
            queue,
            deadline,
            head: None,
            rest: Vec::new().into_iter(),
            state: CursorState::Uninit,
        }
    }

    /// Blocks for the next non-empty batch and reloads `head`.
    fn refill(&mut self) -> MergeResult<()> {
        debug_assert!(self.head.is_none());
        if let Some(row) = self.rest.next() {
            self.head = Some(row);
            return Ok(());
        }
        loop {
            let batch = match self.queue.take(self.deadline) {
                Ok(batch) => batch,
                Err(err) => {
                    self.state = CursorState::Done;
                    return Err(err);
                }
            };
            if batch.is_terminal() {
                self.state = CursorState::Done;
                return Ok(());
            }
            if batch.is_empty() {
                continue;
            }
            self.rest = batch.into_rows().into_iter();
            self.head = self.rest.next();
            return Ok(());
        }
    }
}

impl<T> RowCursor<T> for QueueCursor<T> {
    fn init(&mut self) -> MergeResult<()> {
        if self.state != CursorState::Uninit {
            return Ok(());
        }
        self.state = CursorState::Live;
        self.refill()
    }

    fn peek(&self) -> Option<&T> {
        self.head.as_ref()
    }

    fn pop(&mut self) -> MergeResult<Option<T>> {
        self.init()?;
        let Some(row) = self.head.take() else {
            return Ok(None);
        };
        if self.state == CursorState::Live {
            self.refill()?;
        }
        Ok(Some(row))
    }

    fn is_done(&self) -> bool {
        matches!(self.state, CursorState::Done | CursorState::Closed) && self.head.is_none()
    }

    fn close(&mut self) {
        if self.state != CursorState::Done {
            self.state = CursorState::Closed;
        }
        self.head = None;
        self.rest = Vec::new().into_iter();
    }
}

impl<T> std::fmt::Debug for QueueCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueCursor")
            .field("deadline", &self.deadline)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
