//! The public entry point: plan, submit, and drain.
//!
//! [`MergeEngine`] owns a handle to the host's task pool and a validated
//! configuration. One call to [`MergeEngine::merge`] plans the task graph
//! for a set of pre-sorted inputs, submits the producing tasks leaf-first,
//! and returns a [`MergedStream`] the caller drains lazily.
//!
//! On the serial plan the whole pipeline runs inside the caller's pulls
//! and the pool is never touched. On a fanned plan each input group feeds
//! an intermediate queue, and a final task merges the intermediates into
//! the output queue backing the stream.
//!
//! Dropping or closing the stream before the end cancels the shared
//! token; producer tasks observe it at their next batch boundary and tear
//! down, so the pool returns to zero running tasks for the query within
//! about one batch boundary.

use crate::budget::YieldBudget;
use crate::cancel::CancelToken;
use crate::combine::{Combine, ReduceFn};
use crate::config::{ConfigError, MergeConfig};
use crate::cursor::{QueueCursor, RowCursor, SequenceCursor};
use crate::error::{MergeError, MergeResult};
use crate::metrics::{MergeMetrics, MergeObserver};
use crate::partition::{MergePlan, plan};
use crate::pool::TaskPool;
use crate::queue::BatchQueue;
use crate::sequence::{BoxedSequence, Sequence};
use crate::task::{MergeCombineTask, TaskRole};
use crate::tournament::{CmpFn, TournamentTree};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Plans and launches parallel merge-combine invocations.
///
/// The engine is cheap to clone per call site; it holds only the pool
/// handle, the validated config, and the optional observer.
#[derive(Clone)]
pub struct MergeEngine {
    pool: Arc<dyn TaskPool>,
    config: MergeConfig,
    observer: Option<Arc<dyn MergeObserver>>,
}

impl MergeEngine {
    /// Creates an engine over a host-owned pool, validating `config`.
    pub fn new(pool: Arc<dyn TaskPool>, config: MergeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            pool,
            config,
            observer: None,
        })
    }

    /// Installs a completion observer, fired once per merged stream.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn MergeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merges `inputs` (each non-decreasing under `cmp`) into one
    /// non-decreasing stream, collapsing `cmp`-equal rows with `reduce`.
    ///
    /// `reduce` must be associative and preserve the `cmp` equivalence
    /// class of its arguments. Inputs are consumed exactly once and closed
    /// on every exit path.
    pub fn merge<T, F, R>(
        &self,
        inputs: Vec<BoxedSequence<T>>,
        cmp: F,
        reduce: R,
    ) -> MergedStream<T>
    where
        T: Send + 'static,
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
        R: Fn(T, T) -> MergeResult<T> + Send + Sync + 'static,
    {
        self.merge_shared(inputs, Arc::new(cmp), Arc::new(reduce))
    }

    fn merge_shared<T: Send + 'static>(
        &self,
        inputs: Vec<BoxedSequence<T>>,
        cmp: CmpFn<T>,
        reduce: ReduceFn<T>,
    ) -> MergedStream<T> {
        let cancel = CancelToken::new();
        let metrics = Arc::new(MergeMetrics::new());
        let deadline = self
            .config
            .query_deadline()
            .map(|timeout| Instant::now() + timeout);
        let batch_size = self.config.batch_size_initial;

        match plan(inputs.len(), &self.config) {
            MergePlan::Serial => {
                debug!(inputs = inputs.len(), "merge planned serially");
                let cursors = inputs
                    .into_iter()
                    .map(|source| SequenceCursor::new(source, batch_size))
                    .collect();
                let combiner = Combine::new(
                    TournamentTree::new(cursors, Arc::clone(&cmp)),
                    cmp,
                    reduce,
                );
                MergedStream {
                    inner: StreamInner::Direct { combiner, deadline },
                    cancel,
                    metrics,
                    observer: self.observer.clone(),
                    state: StreamState::Open,
                }
            }
            MergePlan::Fanned { groups } => {
                debug!(
                    inputs = inputs.len(),
                    groups = groups.len(),
                    "merge planned across the pool"
                );
                let budget = YieldBudget::from_config(&self.config);
                let queue_capacity = self.config.queue_capacity_batches;
                let out = Arc::new(BatchQueue::new(queue_capacity, cancel.clone()));

                let mut input_iter = inputs.into_iter();
                let mut intermediates = Vec::with_capacity(groups.len());
                let mut group_tasks = Vec::with_capacity(groups.len());
                for group in &groups {
                    let cursors: Vec<SequenceCursor<T>> = input_iter
                        .by_ref()
                        .take(group.len())
                        .map(|source| SequenceCursor::new(source, batch_size))
                        .collect();
                    let queue = Arc::new(BatchQueue::new(queue_capacity, cancel.clone()));
                    let combiner = Combine::new(
                        TournamentTree::new(cursors, Arc::clone(&cmp)),
                        Arc::clone(&cmp),
                        Arc::clone(&reduce),
                    );
                    group_tasks.push(MergeCombineTask::new(
                        combiner,
                        Arc::clone(&queue),
                        cancel.clone(),
                        deadline,
                        budget,
                        Arc::clone(&metrics),
                        TaskRole::Group,
                    ));
                    intermediates.push(queue);
                }

                let final_cursors: Vec<QueueCursor<T>> = intermediates
                    .iter()
                    .map(|queue| QueueCursor::new(Arc::clone(queue), deadline))
                    .collect();
                let final_combiner = Combine::new(
                    TournamentTree::new(final_cursors, Arc::clone(&cmp)),
                    cmp,
                    reduce,
                );
                let final_task = MergeCombineTask::new(
                    final_combiner,
                    Arc::clone(&out),
                    cancel.clone(),
                    deadline,
                    budget,
                    Arc::clone(&metrics),
                    TaskRole::Final,
                );

                metrics.add_tasks_spawned(group_tasks.len() as u64 + 1);
                for task in group_tasks {
                    self.pool.submit(Box::new(task));
                }
                self.pool.submit(Box::new(final_task));

                MergedStream {
                    inner: StreamInner::Pooled {
                        cursor: QueueCursor::new(out, deadline),
                    },
                    cancel,
                    metrics,
                    observer: self.observer.clone(),
                    state: StreamState::Open,
                }
            }
        }
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// One-call convenience over [`MergeEngine`].
pub fn parallel_merge_combine<T, F, R>(
    pool: Arc<dyn TaskPool>,
    inputs: Vec<BoxedSequence<T>>,
    cmp: F,
    reduce: R,
    config: MergeConfig,
) -> Result<MergedStream<T>, ConfigError>
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    R: Fn(T, T) -> MergeResult<T> + Send + Sync + 'static,
{
    Ok(MergeEngine::new(pool, config)?.merge(inputs, cmp, reduce))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamState {
    Open,
    Ended,
    Errored(MergeError),
}

enum StreamInner<T> {
    /// Serial plan: the pipeline runs inside the caller's pulls.
    Direct {
        combiner: Combine<T, SequenceCursor<T>>,
        deadline: Option<Instant>,
    },
    /// Fanned plan: the caller drains the output queue.
    Pooled { cursor: QueueCursor<T> },
}

/// The merged, combined output stream of one invocation.
///
/// Rows come out non-decreasing under the invocation's ordering with
/// equivalence classes collapsed by its reducer. The stream ends exactly
/// once: after `Ok(None)` every pull repeats `Ok(None)`, and after an
/// error every pull repeats the same error. Dropping the stream early
/// cancels the invocation.
pub struct MergedStream<T> {
    inner: StreamInner<T>,
    cancel: CancelToken,
    metrics: Arc<MergeMetrics>,
    observer: Option<Arc<dyn MergeObserver>>,
    state: StreamState,
}

impl<T> MergedStream<T> {
    /// Pulls the next merged row.
    pub fn next(&mut self) -> MergeResult<Option<T>> {
        match &self.state {
            StreamState::Ended => return Ok(None),
            StreamState::Errored(err) => return Err(err.clone()),
            StreamState::Open => {}
        }
        let pulled = match &mut self.inner {
            StreamInner::Direct { combiner, deadline } => {
                if self.cancel.is_cancelled() {
                    Err(self.cancel.error())
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    Err(MergeError::Timeout)
                } else {
                    let before = combiner.rows_read();
                    let pulled = combiner.next();
                    let consumed = combiner.rows_read() - before;
                    if consumed > 0 {
                        self.metrics.add_input_rows(consumed);
                    }
                    pulled
                }
            }
            StreamInner::Pooled { cursor } => cursor.pop(),
        };
        match pulled {
            Ok(Some(row)) => {
                self.metrics.add_output_rows(1);
                Ok(Some(row))
            }
            Ok(None) => {
                self.state = StreamState::Ended;
                self.teardown();
                Ok(None)
            }
            Err(err) => {
                // Stop the peers, then surface the invocation's first
                // error rather than this observer's view of it.
                self.cancel.cancel(err);
                let latched = self.cancel.error();
                self.state = StreamState::Errored(latched.clone());
                self.teardown();
                Err(latched)
            }
        }
    }

    /// Ends the stream early, cancelling the invocation. Idempotent.
    pub fn close(&mut self) {
        if self.state == StreamState::Open {
            self.cancel.cancel(MergeError::Cancelled);
            self.state = StreamState::Ended;
        }
        self.teardown();
    }

    /// True once the stream has ended or errored.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state != StreamState::Open
    }

    /// Point-in-time counters for this invocation.
    #[must_use]
    pub fn metrics(&self) -> Arc<MergeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Releases local resources and fires the observer exactly once.
    fn teardown(&mut self) {
        match &mut self.inner {
            StreamInner::Direct { combiner, .. } => combiner.close(),
            StreamInner::Pooled { cursor } => cursor.close(),
        }
        if let Some(observer) = self.observer.take() {
            observer.on_complete(&self.metrics.snapshot());
        }
    }
}

impl<T: Send + 'static> Sequence<T> for MergedStream<T> {
    fn next(&mut self) -> MergeResult<Option<T>> {
        Self::next(self)
    }

    fn close(&mut self) {
        Self::close(self);
    }
}

impl<T> Drop for MergedStream<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for MergedStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedStream")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkStealingPool;
    use crate::sequence::boxed_iter_sequence;

    type Row = (i64, i64);

    fn engine(config: MergeConfig) -> MergeEngine {
        let pool: Arc<dyn TaskPool> = Arc::new(WorkStealingPool::new(2));
        MergeEngine::new(pool, config).expect("valid config")
    }

    fn merge_rows(engine: &MergeEngine, inputs: Vec<Vec<Row>>) -> Vec<Row> {
        let inputs = inputs
            .into_iter()
            .map(|rows| boxed_iter_sequence(rows))
            .collect();
        let mut stream = engine.merge(
            inputs,
            |a: &Row, b: &Row| a.0.cmp(&b.0),
            |a: Row, b: Row| Ok((a.0, a.1 + b.1)),
        );
        let mut out = Vec::new();
        while let Some(row) = stream.next().expect("merge") {
            out.push(row);
        }
        out
    }

    #[test]
    fn zero_inputs_end_immediately() {
        let engine = engine(MergeConfig::default());
        assert_eq!(merge_rows(&engine, Vec::new()), Vec::new());
    }

    #[test]
    fn two_inputs_run_serially_and_combine() {
        let engine = engine(MergeConfig::default());
        let out = merge_rows(
            &engine,
            vec![vec![(1, 1), (2, 1), (3, 1)], vec![(1, 10), (3, 10)]],
        );
        assert_eq!(out, vec![(1, 11), (2, 1), (3, 11)]);
    }

    #[test]
    fn fanned_plan_produces_the_serial_result() {
        crate::test_util::init_test_logging();
        let config = MergeConfig {
            serial_input_threshold: 1,
            parallelism_hint: 3,
            batch_size_initial: 128,
            ..MergeConfig::default()
        };
        let engine = engine(config);
        let inputs: Vec<Vec<Row>> = (0..6)
            .map(|lane| (0..40).map(|i| (lane + 6 * i, 1)).collect())
            .collect();
        let out = merge_rows(&engine, inputs);
        let expected: Vec<Row> = (0..240).map(|k| (k, 1)).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn ended_stream_keeps_returning_none() {
        let engine = engine(MergeConfig::default());
        let mut stream = engine.merge(
            vec![boxed_iter_sequence(vec![(1i64, 1i64)])],
            |a: &Row, b: &Row| a.0.cmp(&b.0),
            |a: Row, b: Row| Ok((a.0, a.1 + b.1)),
        );
        assert_eq!(stream.next(), Ok(Some((1, 1))));
        assert_eq!(stream.next(), Ok(None));
        assert_eq!(stream.next(), Ok(None));
        assert!(stream.is_terminated());
    }
}
