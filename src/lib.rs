//! Polymerge: cancel-correct parallel merge-combine for sorted streams.
//!
//! # Overview
//!
//! Polymerge takes a fan-in of N pre-sorted partial result streams, each
//! produced by a scan over a different segment of the same query, and
//! produces a single merged, sort-preserving, partially aggregated stream
//! back to the caller. The engine schedules cooperative tasks onto a
//! shared work-stealing pool, moves row batches through bounded queues,
//! merges with a k-way tournament tree, collapses equal-key runs with a
//! caller-supplied associative reducer, and time-slices every task toward
//! a target run time so no query can monopolize a pool thread.
//!
//! # Core Guarantees
//!
//! - **Sorted output**: with non-decreasing inputs, the output is
//!   non-decreasing under the supplied ordering, with no two adjacent
//!   equal rows after combining.
//! - **Row conservation**: expanding each output row back into its
//!   equivalence class yields a permutation of the input rows, for any
//!   parallelism.
//! - **One terminator**: a stream ends exactly once, with end-of-data or
//!   an error, and every later pull repeats that terminator.
//! - **Cancel-correctness**: cancellation, deadline expiry, and failures
//!   all travel through one shared token; every task observes it at batch
//!   boundaries and tears down within about one in-flight batch.
//! - **Cooperative scheduling**: tasks yield after a bounded amount of
//!   work, and back off (with their unpublished batch in hand) instead of
//!   blocking a pool thread on a full queue.
//!
//! # Module Structure
//!
//! - [`error`](mod@error): the cloneable error taxonomy
//! - [`cancel`]: the shared cancellation token
//! - [`config`]: engine configuration and validation
//! - [`batch`]: fixed-capacity row batches
//! - [`sequence`]: the one-shot lazy pull-stream contract
//! - [`queue`]: bounded batch queues between stages
//! - [`cursor`]: batched read positions over sequences and queues
//! - [`tournament`]: the k-way tournament-tree merge
//! - [`combine`]: adjacent-equal coalescing with the reducer
//! - [`budget`]: adaptive batch-size/yield pacing
//! - [`partition`]: serial-vs-fanned planning
//! - [`pool`]: the task pool contract and the reference work-stealing pool
//! - [`metrics`]: per-query accounting and the completion observer
//! - [`orchestrator`]: the engine entry point and the output stream

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod budget;
pub mod cancel;
pub mod combine;
pub mod config;
pub mod cursor;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod partition;
pub mod pool;
pub mod queue;
pub mod sequence;
pub mod tournament;

mod task;

#[cfg(test)]
mod test_util;

pub use batch::RowBatch;
pub use budget::YieldBudget;
pub use cancel::CancelToken;
pub use combine::{Combine, ReduceFn};
pub use config::{ConfigError, MergeConfig};
pub use cursor::{QueueCursor, RowCursor, SequenceCursor};
pub use error::{MergeError, MergeResult};
pub use metrics::{MergeMetrics, MergeMetricsSnapshot, MergeObserver};
pub use orchestrator::{MergeEngine, MergedStream, parallel_merge_combine};
pub use partition::{MergePlan, plan};
pub use pool::{PoolTask, TaskPool, TaskStep, WorkStealingPool};
pub use queue::{BatchQueue, OfferOutcome};
pub use sequence::{BoxedSequence, IterSequence, Sequence, boxed_iter_sequence, iter_sequence};
pub use tournament::{CmpFn, TournamentTree};
