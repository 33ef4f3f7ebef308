//! The producing merge-combine task.
//!
//! One [`MergeCombineTask`] owns a [`Combine`] pipeline and an output
//! queue. Each pool slice fills and publishes row batches until the yield
//! budget is spent, then retunes the budget from the slice's wall time and
//! hands the continuation back to the pool. The cancel token and the
//! deadline are checked at every batch boundary; a task that observes
//! either, or any pipeline error, closes its cursors and terminates its
//! output queue exactly once (TERMINAL on success, the latched error
//! otherwise).
//!
//! Publishing is back-pressure aware: a full output queue hands the batch
//! back after a bounded wait and the task *backs off*: the unpublished
//! batch rides along in the continuation and the pool thread goes to
//! whoever can make progress, typically the consumer of that queue.

use crate::batch::RowBatch;
use crate::budget::YieldBudget;
use crate::cancel::CancelToken;
use crate::combine::Combine;
use crate::cursor::RowCursor;
use crate::error::MergeError;
use crate::metrics::MergeMetrics;
use crate::pool::{PoolTask, TaskStep};
use crate::queue::{BatchQueue, OfferOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How long a publish waits for queue room before the task backs off.
const PUBLISH_PATIENCE: Duration = Duration::from_millis(10);

/// Position of a task in the graph. Group tasks read original inputs and
/// account for them; the final task reads intermediate queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskRole {
    Group,
    Final,
}

impl TaskRole {
    fn label(self) -> &'static str {
        match self {
            Self::Group => "group-merge",
            Self::Final => "final-merge",
        }
    }
}

enum SliceOutcome {
    Yielded,
    BackedOff,
    Finished,
}

enum Publish {
    Accepted,
    Backpressure,
    Failed,
}

pub(crate) struct MergeCombineTask<T, C> {
    combiner: Combine<T, C>,
    out: Arc<BatchQueue<T>>,
    cancel: CancelToken,
    deadline: Option<Instant>,
    budget: YieldBudget,
    metrics: Arc<MergeMetrics>,
    role: TaskRole,
    /// A batch the output queue refused; re-offered before new work.
    unpublished: Option<RowBatch<T>>,
    /// Set once the combiner has returned its last row; all that remains
    /// is flushing `unpublished` and the terminal batch.
    exhausted: bool,
    rows_since_yield: usize,
    input_rows_reported: u64,
}

impl<T, C: RowCursor<T>> MergeCombineTask<T, C> {
    pub(crate) fn new(
        combiner: Combine<T, C>,
        out: Arc<BatchQueue<T>>,
        cancel: CancelToken,
        deadline: Option<Instant>,
        budget: YieldBudget,
        metrics: Arc<MergeMetrics>,
        role: TaskRole,
    ) -> Self {
        Self {
            combiner,
            out,
            cancel,
            deadline,
            budget,
            metrics,
            role,
            unpublished: None,
            exhausted: false,
            rows_since_yield: 0,
            input_rows_reported: 0,
        }
    }

    fn run_slice(&mut self, slice_start: Instant) -> SliceOutcome {
        loop {
            if self.cancel.is_cancelled() {
                self.fail(self.cancel.error());
                return SliceOutcome::Finished;
            }
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.fail(MergeError::Timeout);
                    return SliceOutcome::Finished;
                }
            }

            // Flush a batch held over from a back-pressure yield.
            if let Some(batch) = self.unpublished.take() {
                let was_terminal = batch.is_terminal();
                match self.publish(batch) {
                    Publish::Accepted => {
                        if was_terminal {
                            self.complete();
                            return SliceOutcome::Finished;
                        }
                    }
                    Publish::Backpressure => return SliceOutcome::BackedOff,
                    Publish::Failed => return SliceOutcome::Finished,
                }
            }

            if self.exhausted {
                match self.publish(RowBatch::terminal()) {
                    Publish::Accepted => {
                        self.complete();
                        return SliceOutcome::Finished;
                    }
                    Publish::Backpressure => return SliceOutcome::BackedOff,
                    Publish::Failed => return SliceOutcome::Finished,
                }
            }

            let mut batch = RowBatch::with_capacity(self.budget.batch_size);
            while !batch.is_full() {
                match self.combiner.next() {
                    Ok(Some(row)) => batch.push(row),
                    Ok(None) => {
                        self.exhausted = true;
                        break;
                    }
                    Err(err) => {
                        self.fail(err);
                        return SliceOutcome::Finished;
                    }
                }
            }
            if !batch.is_empty() {
                match self.publish(batch) {
                    Publish::Accepted => {}
                    Publish::Backpressure => return SliceOutcome::BackedOff,
                    Publish::Failed => return SliceOutcome::Finished,
                }
            }

            if self.rows_since_yield >= self.budget.yield_after {
                self.report_input_rows();
                self.budget = self.budget.tuned(slice_start.elapsed());
                self.rows_since_yield = 0;
                trace!(
                    role = self.role.label(),
                    batch_size = self.budget.batch_size,
                    yield_after = self.budget.yield_after,
                    "task yielding"
                );
                return SliceOutcome::Yielded;
            }
        }
    }

    /// Offers one batch with bounded patience. A refused batch is parked
    /// in `unpublished` for the continuation.
    fn publish(&mut self, batch: RowBatch<T>) -> Publish {
        let rows = batch.len();
        let terminal = batch.is_terminal();
        match self.out.offer_within(batch, PUBLISH_PATIENCE) {
            Ok(OfferOutcome::Accepted) => {
                if !terminal {
                    self.metrics.add_batch();
                    self.rows_since_yield += rows;
                }
                Publish::Accepted
            }
            Ok(OfferOutcome::Full(batch)) => {
                trace!(role = self.role.label(), "output queue full, backing off");
                self.unpublished = Some(batch);
                Publish::Backpressure
            }
            Err(err) => {
                self.fail(err);
                Publish::Failed
            }
        }
    }

    /// Successful completion: TERMINAL is already out.
    fn complete(&mut self) {
        self.combiner.close();
        self.report_input_rows();
        self.metrics.add_task_completed();
        trace!(role = self.role.label(), "task finished");
    }

    /// Terminal failure path: records the first reason on the token,
    /// closes the cursors, and latches the winning reason onto the output
    /// queue. Safe to reach from any error, including an already-fired
    /// token.
    fn fail(&mut self, err: MergeError) {
        let first = self.cancel.cancel(err);
        let latched = self.cancel.error();
        if first && !latched.is_interruption() {
            debug!(role = self.role.label(), error = %latched, "task failed");
        } else {
            trace!(role = self.role.label(), error = %latched, "task stopping");
        }
        self.combiner.close();
        self.out.close_with_error(latched);
        self.report_input_rows();
        self.metrics.add_task_completed();
    }

    /// Accounts rows drawn from original inputs since the last report.
    fn report_input_rows(&mut self) {
        if self.role != TaskRole::Group {
            return;
        }
        let total = self.combiner.rows_read();
        let delta = total - self.input_rows_reported;
        if delta > 0 {
            self.metrics.add_input_rows(delta);
            self.input_rows_reported = total;
        }
    }
}

impl<T, C> PoolTask for MergeCombineTask<T, C>
where
    T: Send + 'static,
    C: RowCursor<T> + Send + 'static,
{
    fn run(mut self: Box<Self>) -> TaskStep {
        let slice_start = Instant::now();
        let outcome = self.run_slice(slice_start);
        self.metrics.add_task_time(slice_start.elapsed());
        match outcome {
            SliceOutcome::Yielded => {
                self.metrics.add_yield();
                TaskStep::Yield(self)
            }
            SliceOutcome::BackedOff => {
                self.metrics.add_yield();
                TaskStep::Backoff(self)
            }
            SliceOutcome::Finished => TaskStep::Complete,
        }
    }

    fn label(&self) -> &'static str {
        self.role.label()
    }
}
