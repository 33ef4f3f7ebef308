//! k-way tournament-tree merge over row cursors.
//!
//! [`TournamentTree`] merges `k` non-decreasing cursors into one
//! non-decreasing stream in `O(log k)` per emitted row. Internal nodes of
//! a complete binary tree hold the winning cursor index of their subtree;
//! emitting a row takes the overall winner's head, advances that cursor,
//! and replays the path from its leaf to the root.
//!
//! Exhausted cursors rank as +∞; head ties break toward the lower cursor
//! index, which keeps single-schedule runs stable. Any cursor error
//! aborts the merge: all cursors are closed and the error propagates.

use crate::cursor::RowCursor;
use crate::error::{MergeError, MergeResult};
use std::cmp::Ordering;
use std::sync::Arc;

/// Caller-supplied total preorder on rows, shared by every task of a
/// query.
pub type CmpFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// A k-way merge over a set of [`RowCursor`]s.
pub struct TournamentTree<T, C> {
    cursors: Vec<C>,
    /// Winner indices of the internal nodes; `tree[1]` is the overall
    /// winner. Leaf `i` of the complete tree is node `k + i`. Empty until
    /// the first pull, and for `k < 2`.
    tree: Vec<usize>,
    cmp: CmpFn<T>,
    initialized: bool,
    emitted: u64,
}

impl<T, C: RowCursor<T>> TournamentTree<T, C> {
    /// Creates a merger over `cursors`. Cursors are initialized lazily on
    /// the first pull; cursors that turn out exhausted are excluded from
    /// the tree.
    #[must_use]
    pub fn new(cursors: Vec<C>, cmp: CmpFn<T>) -> Self {
        Self {
            cursors,
            tree: Vec::new(),
            cmp,
            initialized: false,
            emitted: 0,
        }
    }

    /// Rows emitted so far.
    #[must_use]
    pub fn rows_emitted(&self) -> u64 {
        self.emitted
    }

    /// Initializes every cursor and builds the tree. Idempotent.
    pub fn init(&mut self) -> MergeResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;
        for i in 0..self.cursors.len() {
            if let Err(err) = self.cursors[i].init() {
                self.close();
                return Err(err);
            }
        }
        self.cursors.retain(|c| !c.is_done());
        let k = self.cursors.len();
        if k >= 2 {
            self.tree = vec![0; k];
            for node in (1..k).rev() {
                self.tree[node] = self.play(node);
            }
        }
        Ok(())
    }

    /// Pulls the next row of the merged stream.
    pub fn next(&mut self) -> MergeResult<Option<T>> {
        self.init()?;
        let row = match self.cursors.len() {
            0 => return Ok(None),
            1 => self.pop_checked(0)?,
            _ => {
                let winner = self.tree[1];
                if self.cursors[winner].peek().is_none() {
                    // The winner ranks +∞: every cursor is exhausted.
                    return Ok(None);
                }
                let row = self.pop_checked(winner)?;
                self.replay(winner);
                row
            }
        };
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }

    /// Closes every cursor. Idempotent.
    pub fn close(&mut self) {
        for cursor in &mut self.cursors {
            cursor.close();
        }
    }

    /// Pops cursor `index`, verifying its refilled head does not sort
    /// before the emitted row.
    fn pop_checked(&mut self, index: usize) -> MergeResult<Option<T>> {
        let row = match self.cursors[index].pop() {
            Ok(row) => row,
            Err(err) => {
                self.close();
                return Err(err);
            }
        };
        if let (Some(row), Some(head)) = (&row, self.cursors[index].peek()) {
            if (self.cmp)(head, row) == Ordering::Less {
                self.close();
                return Err(MergeError::Internal("input sequence is not sorted"));
            }
        }
        Ok(row)
    }

    /// Recomputes winners on the path from cursor `index`'s leaf to the
    /// root.
    fn replay(&mut self, index: usize) {
        let k = self.cursors.len();
        let mut node = (k + index) / 2;
        while node >= 1 {
            self.tree[node] = self.play(node);
            node /= 2;
        }
    }

    /// Plays the match at internal node `node` from its children.
    fn play(&self, node: usize) -> usize {
        let left = self.contestant(2 * node);
        let right = self.contestant(2 * node + 1);
        self.winner(left, right)
    }

    /// Resolves a tree node to the cursor index it currently carries.
    fn contestant(&self, node: usize) -> usize {
        let k = self.cursors.len();
        if node >= k { node - k } else { self.tree[node] }
    }

    /// Picks the smaller head; exhausted cursors rank +∞; ties go to the
    /// lower cursor index.
    fn winner(&self, a: usize, b: usize) -> usize {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        match (self.cursors[lo].peek(), self.cursors[hi].peek()) {
            (None, None) | (Some(_), None) => lo,
            (None, Some(_)) => hi,
            (Some(x), Some(y)) => {
                if (self.cmp)(y, x) == Ordering::Less {
                    hi
                } else {
                    lo
                }
            }
        }
    }
}

impl<T, C> std::fmt::Debug for TournamentTree<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TournamentTree")
            .field("cursors", &self.cursors.len())
            .field("initialized", &self.initialized)
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}
