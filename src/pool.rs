//! The task pool contract and a reference work-stealing implementation.
//!
//! The engine only needs three things from its host's pool: submitting a
//! task, a running-task count, and shutdown: the [`TaskPool`] trait.
//! Tasks are cooperative: [`PoolTask::run`] performs one bounded slice of
//! work and either completes or hands back a continuation, which the pool
//! re-queues. A task therefore never holds a worker thread longer than
//! one slice.
//!
//! [`WorkStealingPool`] is the bundled implementation for hosts without a
//! pool of their own: external submissions enter a global injector, each
//! worker keeps a bounded local queue for continuations, and idle workers
//! steal from peers starting at a rotating index before parking on a
//! condvar with a timed wait.

use crossbeam_queue::{ArrayQueue, SegQueue};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};

/// Capacity of each worker's local continuation queue. Overflow spills to
/// the injector.
const LOCAL_QUEUE_CAPACITY: usize = 64;

/// How long an idle worker parks before re-scanning the queues.
const IDLE_PARK: Duration = Duration::from_millis(10);

/// Outcome of one task slice.
pub enum TaskStep {
    /// The task ran out of budget; re-queue the continuation near this
    /// worker.
    Yield(Box<dyn PoolTask>),
    /// The task is waiting on another task's progress (back-pressure);
    /// re-queue the continuation globally, behind already-queued work.
    Backoff(Box<dyn PoolTask>),
    /// The task reached a terminal state.
    Complete,
}

/// A cooperative task: one `run` call performs a bounded slice of work.
pub trait PoolTask: Send {
    /// Runs one slice, consuming the task and possibly returning its
    /// continuation.
    fn run(self: Box<Self>) -> TaskStep;

    /// Short label for diagnostics.
    fn label(&self) -> &'static str {
        "task"
    }
}

/// The pool contract the engine consumes.
///
/// Implement this on a host-owned pool to schedule merge tasks there; the
/// pool outlives every engine using it.
pub trait TaskPool: Send + Sync {
    /// Enqueues a task for execution.
    fn submit(&self, task: Box<dyn PoolTask>);

    /// Number of submitted tasks that have not completed. A yielded
    /// continuation still counts.
    fn running_tasks(&self) -> usize;

    /// Stops the workers. Queued tasks that have not started are dropped.
    /// Idempotent.
    fn shutdown(&self);
}

#[derive(Debug)]
struct Shared {
    injector: SegQueue<Box<dyn PoolTask>>,
    locals: Vec<ArrayQueue<Box<dyn PoolTask>>>,
    running: AtomicUsize,
    stop: AtomicBool,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
}

impl std::fmt::Debug for dyn PoolTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PoolTask({})", self.label())
    }
}

/// A fixed-size work-stealing pool of OS threads.
pub struct WorkStealingPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkStealingPool {
    /// Spawns a pool with `worker_count` threads.
    ///
    /// # Panics
    ///
    /// Panics if `worker_count` is zero or a worker thread cannot be
    /// spawned.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "pool needs at least one worker");
        let shared = Arc::new(Shared {
            injector: SegQueue::new(),
            locals: (0..worker_count)
                .map(|_| ArrayQueue::new(LOCAL_QUEUE_CAPACITY))
                .collect(),
            running: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
        });
        let workers = (0..worker_count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("merge-worker-{index}"))
                    .spawn(move || worker_loop(&shared, index))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        debug!(worker_count, "work-stealing pool started");
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }
}

impl TaskPool for WorkStealingPool {
    fn submit(&self, task: Box<dyn PoolTask>) {
        if self.shared.stop.load(Ordering::Acquire) {
            debug!(label = task.label(), "task dropped: pool is shut down");
            return;
        }
        self.shared.running.fetch_add(1, Ordering::AcqRel);
        trace!(label = task.label(), "task submitted");
        self.shared.injector.push(task);
        // Taking the idle lock orders this push against a worker's
        // empty-check, so the notify cannot be lost.
        drop(self.shared.idle_lock.lock());
        self.shared.idle_cv.notify_one();
    }

    fn running_tasks(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.shared.idle_lock.lock());
        self.shared.idle_cv.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
        debug!("work-stealing pool stopped");
    }
}

impl Drop for WorkStealingPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkStealingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStealingPool")
            .field("workers", &self.shared.locals.len())
            .field("running", &self.running_tasks())
            .finish_non_exhaustive()
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    let mut steal_start = index;
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
        let task = shared.locals[index]
            .pop()
            .or_else(|| shared.injector.pop())
            .or_else(|| steal(shared, index, &mut steal_start));
        match task {
            Some(task) => match task.run() {
                TaskStep::Yield(next) => {
                    trace!(label = next.label(), worker = index, "task yielded");
                    if let Err(next) = shared.locals[index].push(next) {
                        shared.injector.push(next);
                    }
                    shared.idle_cv.notify_one();
                }
                TaskStep::Backoff(next) => {
                    trace!(label = next.label(), worker = index, "task backed off");
                    shared.injector.push(next);
                    shared.idle_cv.notify_one();
                }
                TaskStep::Complete => {
                    shared.running.fetch_sub(1, Ordering::AcqRel);
                }
            },
            None => {
                let mut guard = shared.idle_lock.lock();
                if shared.stop.load(Ordering::Acquire) {
                    return;
                }
                if shared.injector.is_empty() {
                    let _ = shared
                        .idle_cv
                        .wait_for(&mut guard, IDLE_PARK);
                }
            }
        }
    }
}

/// Tries every peer's local queue once, starting after the last
/// successful victim so steals spread across the pool.
fn steal(shared: &Shared, index: usize, steal_start: &mut usize) -> Option<Box<dyn PoolTask>> {
    let n = shared.locals.len();
    for offset in 0..n {
        let victim = (*steal_start + offset) % n;
        if victim == index {
            continue;
        }
        if let Some(task) = shared.locals[victim].pop() {
            *steal_start = victim;
            return Some(task);
        }
    }
    None
}
