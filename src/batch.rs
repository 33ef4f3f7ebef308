//! Fixed-capacity row batches.
//!
//! A [`RowBatch`] is the unit of transport between pipeline stages: a
//! producer fills one, publishes it to a queue, and the consumer drains it
//! exactly once. A distinguished *terminal* batch carries no rows and marks
//! the end of a stream.

/// A fixed-capacity, ordered buffer of rows.
///
/// Draining is one-shot and expressed through move semantics: consuming the
/// batch with [`RowBatch::into_rows`] (or `IntoIterator`) invalidates it.
/// Pushing into a full or terminal batch is a programming fault and panics.
#[derive(Debug, PartialEq)]
pub struct RowBatch<T> {
    rows: Vec<T>,
    capacity: usize,
    terminal: bool,
}

impl<T> RowBatch<T> {
    /// Creates an empty batch with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "row batch capacity must be non-zero");
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
            terminal: false,
        }
    }

    /// Creates the terminal sentinel: zero rows, zero capacity.
    #[must_use]
    pub fn terminal() -> Self {
        Self {
            rows: Vec::new(),
            capacity: 0,
            terminal: true,
        }
    }

    /// Appends a row.
    ///
    /// # Panics
    ///
    /// Panics if the batch is full or terminal.
    pub fn push(&mut self, row: T) {
        assert!(!self.terminal, "cannot push into a terminal batch");
        assert!(self.rows.len() < self.capacity, "cannot push into a full batch");
        self.rows.push(row);
    }

    /// Returns true when the batch holds `capacity` rows.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.terminal || self.rows.len() >= self.capacity
    }

    /// Number of buffered rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when no rows are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true for the terminal sentinel.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// The configured capacity. Zero for the terminal sentinel.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Consumes the batch, yielding its rows in insertion order.
    #[must_use]
    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }
}

impl<T> IntoIterator for RowBatch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_to_capacity() {
        let mut batch = RowBatch::with_capacity(3);
        assert!(batch.is_empty());
        for i in 0..3 {
            assert!(!batch.is_full());
            batch.push(i);
        }
        assert!(batch.is_full());
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.into_rows(), vec![0, 1, 2]);
    }

    #[test]
    fn terminal_carries_no_rows() {
        let batch = RowBatch::<u32>::terminal();
        assert!(batch.is_terminal());
        assert!(batch.is_empty());
        assert!(batch.is_full());
        assert_eq!(batch.capacity(), 0);
    }

    #[test]
    #[should_panic(expected = "full batch")]
    fn push_into_full_batch_panics() {
        let mut batch = RowBatch::with_capacity(1);
        batch.push(1);
        batch.push(2);
    }

    #[test]
    #[should_panic(expected = "terminal batch")]
    fn push_into_terminal_batch_panics() {
        let mut batch = RowBatch::terminal();
        batch.push(1);
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn zero_capacity_panics() {
        let _ = RowBatch::<u32>::with_capacity(0);
    }

    #[test]
    fn iterates_in_insertion_order() {
        let mut batch = RowBatch::with_capacity(4);
        batch.push("a");
        batch.push("b");
        let collected: Vec<_> = batch.into_iter().collect();
        assert_eq!(collected, vec!["a", "b"]);
    }
}
