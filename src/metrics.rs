//! Per-query accounting.
//!
//! Every task of one merge-combine invocation shares a [`MergeMetrics`]
//! cell and bumps its counters with relaxed atomics; the counters are
//! monotone, so relaxed ordering is sufficient. A [`MergeMetricsSnapshot`]
//! is taken when the output stream terminates and handed to the optional
//! [`MergeObserver`] exactly once. There is no global registry: the
//! observer is injected through the engine.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counters shared by the tasks of one invocation.
#[derive(Debug, Default)]
pub struct MergeMetrics {
    input_rows: AtomicU64,
    output_rows: AtomicU64,
    batches_published: AtomicU64,
    task_yields: AtomicU64,
    tasks_spawned: AtomicU64,
    tasks_completed: AtomicU64,
    task_cpu_micros: AtomicU64,
}

impl MergeMetrics {
    /// Creates a zeroed metrics cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records rows drawn from the original input sequences.
    pub fn add_input_rows(&self, rows: u64) {
        self.input_rows.fetch_add(rows, Ordering::Relaxed);
    }

    /// Records rows delivered to the caller.
    pub fn add_output_rows(&self, rows: u64) {
        self.output_rows.fetch_add(rows, Ordering::Relaxed);
    }

    /// Records one published batch.
    pub fn add_batch(&self) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one cooperative yield.
    pub fn add_yield(&self) {
        self.task_yields.fetch_add(1, Ordering::Relaxed);
    }

    /// Records tasks submitted to the pool.
    pub fn add_tasks_spawned(&self, tasks: u64) {
        self.tasks_spawned.fetch_add(tasks, Ordering::Relaxed);
    }

    /// Records one task reaching a terminal state.
    pub fn add_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulates wall time a task spent holding a pool thread.
    pub fn add_task_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.task_cpu_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MergeMetricsSnapshot {
        MergeMetricsSnapshot {
            input_rows: self.input_rows.load(Ordering::Relaxed),
            output_rows: self.output_rows.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            task_yields: self.task_yields.load(Ordering::Relaxed),
            tasks_spawned: self.tasks_spawned.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            task_cpu_micros: self.task_cpu_micros.load(Ordering::Relaxed),
        }
    }
}

/// Plain-data copy of the counters of one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeMetricsSnapshot {
    /// Rows drawn from the original input sequences.
    pub input_rows: u64,
    /// Rows delivered to the caller.
    pub output_rows: u64,
    /// Batches published across every queue edge.
    pub batches_published: u64,
    /// Cooperative yields across every task.
    pub task_yields: u64,
    /// Tasks submitted to the pool (zero on the serial path).
    pub tasks_spawned: u64,
    /// Tasks that reached a terminal state.
    pub tasks_completed: u64,
    /// Accumulated task wall time, in microseconds.
    pub task_cpu_micros: u64,
}

/// Callback observing the completion of one invocation.
///
/// Fired exactly once per output stream, on the consumer's thread, when
/// the stream terminates (end of data, error, or early close). Observers
/// must not block.
pub trait MergeObserver: Send + Sync {
    /// Receives the final counters of the invocation.
    fn on_complete(&self, snapshot: &MergeMetricsSnapshot);
}
