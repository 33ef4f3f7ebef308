//! Bounded batch queue between pipeline stages.
//!
//! Each producer-to-consumer edge of the task graph is one [`BatchQueue`]:
//! a FIFO bounded buffer of [`RowBatch`]es guarded by a mutex and two
//! condition variables (not-full, not-empty). It is the only
//! synchronization point between the two tasks it connects.
//!
//! # Cancellation and deadlines
//!
//! Blocked `offer`/`take` calls re-check the shared [`CancelToken`] on a
//! short poll slice, so a fired token terminates any wait in bounded time
//! without the token having to know about queues. `take` additionally
//! honors an optional absolute deadline and reports
//! [`MergeError::Timeout`] on expiry.
//!
//! # Termination
//!
//! A producer ends the stream by offering the terminal batch exactly once.
//! After the terminal batch has been taken, every subsequent `take`
//! returns a terminal batch again. `close_with_error` latches an error
//! instead: buffered batches are dropped and every subsequent `take`
//! returns the same error.

use crate::batch::RowBatch;
use crate::cancel::CancelToken;
use crate::error::{MergeError, MergeResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How long a blocked queue operation sleeps between cancellation checks.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Outcome of a bounded-patience offer.
#[derive(Debug)]
pub enum OfferOutcome<T> {
    /// The batch was enqueued.
    Accepted,
    /// The queue stayed full for the whole wait; the batch comes back to
    /// the caller.
    Full(RowBatch<T>),
}

/// A bounded multi-producer/single-consumer queue of row batches.
#[derive(Debug)]
pub struct BatchQueue<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    cancel: CancelToken,
}

#[derive(Debug)]
struct State<T> {
    buf: VecDeque<RowBatch<T>>,
    /// Latched by `close_with_error`; wins over buffered data.
    error: Option<MergeError>,
    /// Set once the terminal batch has been taken.
    finished: bool,
}

impl<T> BatchQueue<T> {
    /// Creates a queue holding at most `capacity` batches.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, cancel: CancelToken) -> Self {
        assert!(capacity > 0, "batch queue capacity must be non-zero");
        Self {
            state: Mutex::new(State {
                buf: VecDeque::with_capacity(capacity),
                error: None,
                finished: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
            cancel,
        }
    }

    /// The configured capacity, in batches.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered batches. Advisory; racy by nature.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().buf.len()
    }

    /// Returns true when no batches are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().buf.is_empty()
    }

    /// Publishes a batch, blocking while the queue is full.
    ///
    /// Returns the latched error if the queue was closed with one, or the
    /// cancellation reason if the shared token fires while waiting.
    pub fn offer(&self, batch: RowBatch<T>) -> MergeResult<()> {
        let mut batch = batch;
        loop {
            match self.offer_within(batch, CANCEL_POLL)? {
                OfferOutcome::Accepted => return Ok(()),
                OfferOutcome::Full(returned) => batch = returned,
            }
        }
    }

    /// Publishes a batch, waiting at most `patience` for room.
    ///
    /// A full queue hands the batch back as [`OfferOutcome::Full`] so a
    /// cooperative producer can yield its thread instead of blocking on
    /// back-pressure.
    pub fn offer_within(
        &self,
        batch: RowBatch<T>,
        patience: Duration,
    ) -> MergeResult<OfferOutcome<T>> {
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if self.cancel.is_cancelled() {
                return Err(self.cancel.error());
            }
            if state.buf.len() < self.capacity {
                state.buf.push_back(batch);
                drop(state);
                self.not_empty.notify_one();
                return Ok(OfferOutcome::Accepted);
            }
            if waited {
                return Ok(OfferOutcome::Full(batch));
            }
            let _ = self.not_full.wait_for(&mut state, patience);
            waited = true;
        }
    }

    /// Takes the next batch, blocking while the queue is empty.
    ///
    /// `deadline` bounds the wait; expiry returns [`MergeError::Timeout`].
    /// After the terminal batch has been taken once, every subsequent call
    /// returns a fresh terminal batch.
    pub fn take(&self, deadline: Option<Instant>) -> MergeResult<RowBatch<T>> {
        let mut state = self.state.lock();
        loop {
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if self.cancel.is_cancelled() {
                return Err(self.cancel.error());
            }
            if state.finished {
                return Ok(RowBatch::terminal());
            }
            if let Some(batch) = state.buf.pop_front() {
                if batch.is_terminal() {
                    state.finished = true;
                }
                drop(state);
                self.not_full.notify_one();
                return Ok(batch);
            }
            let wait_until = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(MergeError::Timeout);
                    }
                    d.min(now + CANCEL_POLL)
                }
                None => Instant::now() + CANCEL_POLL,
            };
            let _ = self.not_empty.wait_until(&mut state, wait_until);
        }
    }

    /// Latches an error: buffered batches are dropped and every later
    /// `take` returns `err`.
    ///
    /// The first latched error wins; calling this after the terminal batch
    /// has been taken is a no-op.
    pub fn close_with_error(&self, err: MergeError) {
        {
            let mut state = self.state.lock();
            if state.error.is_some() || state.finished {
                return;
            }
            state.buf.clear();
            state.error = Some(err);
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn batch_of(rows: Vec<u32>) -> RowBatch<u32> {
        let mut batch = RowBatch::with_capacity(rows.len().max(1));
        for row in rows {
            batch.push(row);
        }
        batch
    }

    #[test]
    fn fifo_order_within_capacity() {
        let queue = BatchQueue::new(4, CancelToken::new());
        queue.offer(batch_of(vec![1])).expect("offer");
        queue.offer(batch_of(vec![2])).expect("offer");
        assert_eq!(queue.take(None).expect("take").into_rows(), vec![1]);
        assert_eq!(queue.take(None).expect("take").into_rows(), vec![2]);
    }

    #[test]
    fn terminal_batch_latches() {
        let queue = BatchQueue::<u32>::new(2, CancelToken::new());
        queue.offer(RowBatch::terminal()).expect("offer");
        assert!(queue.take(None).expect("take").is_terminal());
        assert!(queue.take(None).expect("take").is_terminal());
        assert!(queue.take(None).expect("take").is_terminal());
    }

    #[test]
    fn closed_queue_repeats_error() {
        let queue = BatchQueue::<u32>::new(2, CancelToken::new());
        queue.offer(batch_of(vec![7])).expect("offer");
        queue.close_with_error(MergeError::source("upstream died"));
        let err = queue.take(None).expect_err("errored");
        assert_eq!(err, MergeError::Source("upstream died".into()));
        assert_eq!(queue.take(None), Err(err));
    }

    #[test]
    fn error_after_terminal_taken_is_ignored() {
        let queue = BatchQueue::<u32>::new(2, CancelToken::new());
        queue.offer(RowBatch::terminal()).expect("offer");
        assert!(queue.take(None).expect("take").is_terminal());
        queue.close_with_error(MergeError::Timeout);
        assert!(queue.take(None).expect("take").is_terminal());
    }

    #[test]
    fn bounded_offer_hands_the_batch_back() {
        let queue = BatchQueue::new(1, CancelToken::new());
        queue.offer(batch_of(vec![1])).expect("offer");
        match queue
            .offer_within(batch_of(vec![2]), Duration::from_millis(5))
            .expect("no error")
        {
            OfferOutcome::Full(batch) => assert_eq!(batch.into_rows(), vec![2]),
            OfferOutcome::Accepted => panic!("queue was full"),
        }
        // Room opens up; the same call now succeeds.
        assert_eq!(queue.take(None).expect("take").into_rows(), vec![1]);
        assert!(matches!(
            queue
                .offer_within(batch_of(vec![2]), Duration::from_millis(5))
                .expect("no error"),
            OfferOutcome::Accepted
        ));
    }

    #[test]
    fn take_times_out_at_deadline() {
        let queue = BatchQueue::<u32>::new(1, CancelToken::new());
        let deadline = Instant::now() + Duration::from_millis(30);
        let started = Instant::now();
        assert_eq!(queue.take(Some(deadline)), Err(MergeError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn offer_blocks_until_room() {
        let cancel = CancelToken::new();
        let queue = Arc::new(BatchQueue::new(1, cancel));
        queue.offer(batch_of(vec![1])).expect("offer");

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.offer(batch_of(vec![2])))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.take(None).expect("take").into_rows(), vec![1]);
        producer.join().expect("producer").expect("offer succeeds");
        assert_eq!(queue.take(None).expect("take").into_rows(), vec![2]);
    }

    #[test]
    fn cancellation_unblocks_both_sides() {
        crate::test_util::init_test_logging();
        let cancel = CancelToken::new();
        let queue = Arc::new(BatchQueue::<u32>::new(1, cancel.clone()));
        queue.offer(batch_of(vec![1])).expect("offer");

        let blocked_producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.offer(batch_of(vec![2])))
        };
        let blocked_consumer = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cancel.cancel(MergeError::Cancelled);
            })
        };
        let err = blocked_producer.join().expect("join").expect_err("cancelled");
        assert_eq!(err, MergeError::Cancelled);
        blocked_consumer.join().expect("join");
        assert_eq!(queue.take(None), Err(MergeError::Cancelled));
    }
}
