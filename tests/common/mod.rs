//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use polymerge::{
    BoxedSequence, MergeConfig, MergeEngine, MergeError, MergeResult, MergedStream, Sequence,
    TaskPool, WorkStealingPool, boxed_iter_sequence,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The row shape used across the suites: `(key, value)`.
pub type Row = (i64, i64);

/// Engine over a fresh reference pool.
pub fn engine(workers: usize, config: MergeConfig) -> (Arc<dyn TaskPool>, MergeEngine) {
    let pool: Arc<dyn TaskPool> = Arc::new(WorkStealingPool::new(workers));
    let engine = MergeEngine::new(Arc::clone(&pool), config).expect("valid config");
    (pool, engine)
}

/// A config that forces the fanned plan and keeps batches small enough to
/// exercise yielding and back-pressure on modest inputs.
pub fn fanned_config(parallelism: usize) -> MergeConfig {
    MergeConfig {
        parallelism_hint: parallelism,
        serial_input_threshold: 1,
        batch_size_initial: 32,
        batch_size_min: 8,
        batch_size_max: 256,
        yield_after_initial: 64,
        yield_after_min: 16,
        yield_after_max: 1024,
        queue_capacity_batches: 2,
        ..MergeConfig::default()
    }
}

/// Launches a merge of `inputs` with key ordering and value-summing
/// reduction.
pub fn merge_inputs(engine: &MergeEngine, inputs: Vec<Vec<Row>>) -> MergedStream<Row> {
    let inputs: Vec<BoxedSequence<Row>> = inputs
        .into_iter()
        .map(|rows| boxed_iter_sequence(rows))
        .collect();
    merge_sequences(engine, inputs)
}

/// Launches a merge of arbitrary sequences with the standard ordering and
/// reducer.
pub fn merge_sequences(
    engine: &MergeEngine,
    inputs: Vec<BoxedSequence<Row>>,
) -> MergedStream<Row> {
    engine.merge(
        inputs,
        |a: &Row, b: &Row| a.0.cmp(&b.0),
        |a: Row, b: Row| Ok((a.0, a.1 + b.1)),
    )
}

/// Drains a stream, panicking on error.
pub fn drain(stream: &mut MergedStream<Row>) -> Vec<Row> {
    let mut rows = Vec::new();
    while let Some(row) = stream.next().expect("merge succeeds") {
        rows.push(row);
    }
    rows
}

/// The serial reference result: per-key value sums, ordered by key.
pub fn reference_combine(inputs: &[Vec<Row>]) -> Vec<Row> {
    let mut sums = BTreeMap::new();
    for input in inputs {
        for (key, value) in input {
            *sums.entry(*key).or_insert(0) += value;
        }
    }
    sums.into_iter().collect()
}

/// Deterministic pseudo-random keys for bulk fixtures.
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next_in(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

/// A sequence that fails after a fixed number of rows.
pub struct FailingSequence {
    pub rows: Vec<Row>,
    pub emitted: usize,
    pub fail_after: usize,
}

impl Sequence<Row> for FailingSequence {
    fn next(&mut self) -> MergeResult<Option<Row>> {
        if self.emitted >= self.fail_after {
            return Err(MergeError::source("segment scan aborted"));
        }
        let row = self.rows.get(self.emitted).copied();
        self.emitted += 1;
        Ok(row)
    }
}

/// A sequence that sleeps before its first row.
pub struct SlowSequence {
    pub rows: Vec<Row>,
    pub delay: Duration,
    pub index: usize,
}

impl Sequence<Row> for SlowSequence {
    fn next(&mut self) -> MergeResult<Option<Row>> {
        if self.index == 0 {
            std::thread::sleep(self.delay);
        }
        let row = self.rows.get(self.index).copied();
        self.index += 1;
        Ok(row)
    }
}

/// A sequence that records whether it was closed.
pub struct TrackingSequence {
    pub rows: std::vec::IntoIter<Row>,
    pub closed: Arc<AtomicBool>,
}

impl TrackingSequence {
    pub fn new(rows: Vec<Row>) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                rows: rows.into_iter(),
                closed: Arc::clone(&closed),
            },
            closed,
        )
    }
}

impl Sequence<Row> for TrackingSequence {
    fn next(&mut self) -> MergeResult<Option<Row>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
