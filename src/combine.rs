//! Adjacent-equal coalescing over a sorted stream.
//!
//! [`Combine`] reads the output of a [`TournamentTree`] and folds runs of
//! `cmp`-equal rows into one row with the user-supplied associative
//! reducer, emitting on every class change. A one-row class passes
//! through untouched; the reducer only runs when a class holds at least
//! two rows, so no neutral element is ever invented for it.
//!
//! The reducer must preserve the `cmp` equivalence class of its inputs.
//! The combiner does not verify that, but it never reorders across class
//! boundaries, so a well-behaved reducer yields a non-decreasing output
//! with no two adjacent equal rows.

use crate::cursor::RowCursor;
use crate::error::MergeResult;
use crate::tournament::{CmpFn, TournamentTree};
use std::cmp::Ordering;
use std::sync::Arc;

/// User-supplied associative reducer, shared by every task of a query.
pub type ReduceFn<T> = Arc<dyn Fn(T, T) -> MergeResult<T> + Send + Sync>;

/// Folds adjacent `cmp`-equal rows of a sorted merge into single rows.
pub struct Combine<T, C> {
    merged: TournamentTree<T, C>,
    cmp: CmpFn<T>,
    reduce: ReduceFn<T>,
    /// First row of the next equivalence class, read past the current one.
    lookahead: Option<T>,
    done: bool,
}

impl<T, C: RowCursor<T>> Combine<T, C> {
    /// Wraps a sorted merge with a reducer.
    #[must_use]
    pub fn new(merged: TournamentTree<T, C>, cmp: CmpFn<T>, reduce: ReduceFn<T>) -> Self {
        Self {
            merged,
            cmp,
            reduce,
            lookahead: None,
            done: false,
        }
    }

    /// Pulls the next combined row.
    ///
    /// Errors (from a cursor, the merge, or the reducer) are terminal: the
    /// underlying cursors are closed and later calls return `Ok(None)`.
    pub fn next(&mut self) -> MergeResult<Option<T>> {
        if self.done {
            return Ok(None);
        }
        let mut acc = match self.lookahead.take() {
            Some(row) => row,
            None => match self.pull()? {
                Some(row) => row,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            },
        };
        loop {
            match self.pull()? {
                Some(row) => {
                    if (self.cmp)(&acc, &row) == Ordering::Equal {
                        acc = match (self.reduce)(acc, row) {
                            Ok(folded) => folded,
                            Err(err) => {
                                self.finish();
                                return Err(err);
                            }
                        };
                    } else {
                        self.lookahead = Some(row);
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(Some(acc))
    }

    /// Rows consumed from the underlying merge so far.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.merged.rows_emitted()
    }

    /// Closes the underlying cursors. Idempotent.
    pub fn close(&mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.done = true;
        self.lookahead = None;
        self.merged.close();
    }

    fn pull(&mut self) -> MergeResult<Option<T>> {
        match self.merged.next() {
            Ok(row) => Ok(row),
            Err(err) => {
                self.finish();
                Err(err)
            }
        }
    }
}

impl<T, C> std::fmt::Debug for Combine<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Combine")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
