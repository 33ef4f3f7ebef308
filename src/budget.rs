//! Adaptive batch-size and yield pacing.
//!
//! Every producing task carries a [`YieldBudget`]: how many rows go into
//! one published batch, and how many rows it publishes before giving its
//! pool thread back. At each yield point the task samples the wall time of
//! the slice it just ran and retunes both numbers toward a configured
//! target slice run time. Both values are clamped, so degenerate samples
//! (a slice that blocked, or one that finished in microseconds) cannot
//! drive them to extremes.

use crate::config::MergeConfig;
use std::time::Duration;

/// Per-task pacing parameters, adapted at every yield point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldBudget {
    /// Rows per published batch.
    pub batch_size: usize,
    /// Rows published per slice before yielding.
    pub yield_after: usize,
    target: Duration,
    batch_min: usize,
    batch_max: usize,
    yield_min: usize,
    yield_max: usize,
}

impl YieldBudget {
    /// Builds the initial budget from a validated config.
    #[must_use]
    pub fn from_config(config: &MergeConfig) -> Self {
        Self {
            batch_size: config.batch_size_initial,
            yield_after: config.yield_after_initial,
            target: config.target_task_runtime(),
            batch_min: config.batch_size_min,
            batch_max: config.batch_size_max,
            yield_min: config.yield_after_min,
            yield_max: config.yield_after_max,
        }
    }

    /// The target slice run time.
    #[must_use]
    pub fn target(&self) -> Duration {
        self.target
    }

    /// Returns the budget for the next slice, scaled by how far the
    /// elapsed slice time missed the target.
    ///
    /// A slice twice as slow as the target halves both parameters; a slice
    /// twice as fast doubles them, within the configured clamps. Sampling
    /// is pure arithmetic and never blocks.
    #[must_use]
    pub fn tuned(&self, elapsed: Duration) -> Self {
        let elapsed = elapsed.max(Duration::from_nanos(1));
        let ratio = self.target.as_secs_f64() / elapsed.as_secs_f64();
        let scale = |value: usize, lo: usize, hi: usize| -> usize {
            let scaled = (value as f64 * ratio).round();
            if scaled >= hi as f64 {
                hi
            } else if scaled <= lo as f64 {
                lo
            } else {
                scaled as usize
            }
        };
        Self {
            batch_size: scale(self.batch_size, self.batch_min, self.batch_max),
            yield_after: scale(self.yield_after, self.yield_min, self.yield_max),
            ..*self
        }
    }
}
