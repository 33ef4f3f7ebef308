//! Engine configuration.
//!
//! [`MergeConfig`] collects every tunable of a merge-combine invocation:
//! batch sizing, yield pacing, fan-out limits, queue capacity, and the
//! optional query-wide deadline. Values are validated once, when the
//! engine is constructed, so the hot path never re-checks them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default capacity of a row batch at task start.
pub const DEFAULT_BATCH_SIZE: usize = 4096;
/// Default number of rows a task publishes before yielding its thread.
pub const DEFAULT_YIELD_AFTER: usize = 16_384;
/// Default target run time of one task slice, in milliseconds.
pub const DEFAULT_TARGET_TASK_RUNTIME_MS: u64 = 100;
/// Default bound on concurrently running merge groups.
pub const DEFAULT_PARALLELISM_HINT: usize = 4;
/// Default queue capacity, in batches, per producer/consumer edge.
pub const DEFAULT_QUEUE_CAPACITY_BATCHES: usize = 4;

/// Configuration for [`MergeEngine`](crate::orchestrator::MergeEngine).
///
/// All fields are public and serde-serializable so hosts can load them from
/// their own configuration surface; use [`MergeConfig::validate`] (or let
/// the engine constructor do it) before running with hand-built values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Initial capacity of published row batches.
    pub batch_size_initial: usize,
    /// Lower clamp for adaptive batch sizing.
    pub batch_size_min: usize,
    /// Upper clamp for adaptive batch sizing.
    pub batch_size_max: usize,
    /// Initial number of rows a task publishes before yielding.
    pub yield_after_initial: usize,
    /// Lower clamp for the adaptive yield threshold.
    pub yield_after_min: usize,
    /// Upper clamp for the adaptive yield threshold.
    pub yield_after_max: usize,
    /// Target wall-clock run time of one task slice, in milliseconds.
    pub target_task_runtime_ms: u64,
    /// Upper bound on the number of concurrent merge groups.
    pub parallelism_hint: usize,
    /// Input-count threshold at or below which the merge runs serially in
    /// the caller's pulls, without touching the pool.
    pub serial_input_threshold: usize,
    /// Capacity, in batches, of each producer-to-consumer queue.
    pub queue_capacity_batches: usize,
    /// Absolute deadline for the whole invocation, in milliseconds from
    /// the moment the merge is planned. `None` disables the deadline.
    pub query_deadline_ms: Option<u64>,
    /// Minimum number of inputs per merge group.
    pub fanin_min: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            batch_size_initial: DEFAULT_BATCH_SIZE,
            batch_size_min: 128,
            batch_size_max: 32_768,
            yield_after_initial: DEFAULT_YIELD_AFTER,
            yield_after_min: 1024,
            yield_after_max: 262_144,
            target_task_runtime_ms: DEFAULT_TARGET_TASK_RUNTIME_MS,
            parallelism_hint: DEFAULT_PARALLELISM_HINT,
            serial_input_threshold: 2,
            queue_capacity_batches: DEFAULT_QUEUE_CAPACITY_BATCHES,
            query_deadline_ms: None,
            fanin_min: 2,
        }
    }
}

impl MergeConfig {
    /// Sets the initial batch size.
    #[must_use]
    pub fn with_batch_size(mut self, rows: usize) -> Self {
        self.batch_size_initial = rows;
        self
    }

    /// Sets the initial yield threshold.
    #[must_use]
    pub fn with_yield_after(mut self, rows: usize) -> Self {
        self.yield_after_initial = rows;
        self
    }

    /// Sets the target task slice run time.
    #[must_use]
    pub fn with_target_task_runtime(mut self, target: Duration) -> Self {
        self.target_task_runtime_ms = target.as_millis() as u64;
        self
    }

    /// Sets the parallelism hint.
    #[must_use]
    pub fn with_parallelism(mut self, hint: usize) -> Self {
        self.parallelism_hint = hint;
        self
    }

    /// Sets the query-wide deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.query_deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    /// Sets the per-edge queue capacity, in batches.
    #[must_use]
    pub fn with_queue_capacity(mut self, batches: usize) -> Self {
        self.queue_capacity_batches = batches;
        self
    }

    /// Target task slice run time as a [`Duration`].
    #[must_use]
    pub fn target_task_runtime(&self) -> Duration {
        Duration::from_millis(self.target_task_runtime_ms)
    }

    /// Query deadline as a [`Duration`], if configured.
    #[must_use]
    pub fn query_deadline(&self) -> Option<Duration> {
        self.query_deadline_ms.map(Duration::from_millis)
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn nonzero(name: &'static str, value: usize) -> Result<(), ConfigError> {
            if value == 0 {
                Err(ConfigError::Zero(name))
            } else {
                Ok(())
            }
        }
        fn window(
            name: &'static str,
            min: usize,
            initial: usize,
            max: usize,
        ) -> Result<(), ConfigError> {
            if min > max || initial < min || initial > max {
                Err(ConfigError::Window(name))
            } else {
                Ok(())
            }
        }

        nonzero("batch_size_initial", self.batch_size_initial)?;
        nonzero("batch_size_min", self.batch_size_min)?;
        nonzero("yield_after_initial", self.yield_after_initial)?;
        nonzero("yield_after_min", self.yield_after_min)?;
        nonzero("queue_capacity_batches", self.queue_capacity_batches)?;
        nonzero("fanin_min", self.fanin_min)?;
        nonzero(
            "target_task_runtime_ms",
            usize::try_from(self.target_task_runtime_ms).unwrap_or(usize::MAX),
        )?;
        window(
            "batch_size",
            self.batch_size_min,
            self.batch_size_initial,
            self.batch_size_max,
        )?;
        window(
            "yield_after",
            self.yield_after_min,
            self.yield_after_initial,
            self.yield_after_max,
        )?;
        Ok(())
    }
}

/// Error returned when a [`MergeConfig`] is internally inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The named option must be non-zero.
    Zero(&'static str),
    /// The named min/initial/max window is inverted or excludes its
    /// initial value.
    Window(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zero(name) => write!(f, "config option `{name}` must be non-zero"),
            Self::Window(name) => {
                write!(f, "config window `{name}` excludes its initial value")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert_eq!(MergeConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_options_are_rejected() {
        let config = MergeConfig {
            queue_capacity_batches: 0,
            ..MergeConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("queue_capacity_batches"))
        );
        let config = MergeConfig {
            fanin_min: 0,
            ..MergeConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("fanin_min")));
    }

    #[test]
    fn inverted_windows_are_rejected() {
        let config = MergeConfig::default().with_batch_size(64);
        assert_eq!(config.validate(), Err(ConfigError::Window("batch_size")));
        let config = MergeConfig {
            yield_after_min: 10,
            yield_after_max: 5,
            yield_after_initial: 7,
            ..MergeConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Window("yield_after")));
    }

    #[test]
    fn builder_setters_round_trip() {
        let config = MergeConfig::default()
            .with_parallelism(8)
            .with_deadline(Duration::from_secs(5))
            .with_target_task_runtime(Duration::from_millis(50));
        assert_eq!(config.parallelism_hint, 8);
        assert_eq!(config.query_deadline(), Some(Duration::from_secs(5)));
        assert_eq!(config.target_task_runtime(), Duration::from_millis(50));
    }
}
