//! Fixed-size worker pool with a bounded FIFO job queue.
//!
//! One mutex guards the queue, the in-flight counter, and the stop flag;
//! two condvars signal "queue non-empty" (to workers) and "in-flight
//! reached zero" (to `wait_all`). Submission applies backpressure by
//! spin-yielding while the queue is full — the only submitter is the
//! simulation manager, which is allowed to block. Workers pop one job,
//! drop the lock, run the trajectory, update the aggregate, and decrement
//! in-flight under the lock.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use meander_proto::Pos;
use meander_world::{Aggregate, CellUpdate, Grid};
use tracing::trace;

use crate::rng::WalkRng;
use crate::walk::{run_walk, Thresholds};

/// Minimum queue capacity.
pub const MIN_QUEUE_CAPACITY: usize = 16;

/// One trajectory job. Owned by the queue until a worker pops it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Job {
    /// Aggregate index of the start cell.
    pub cell_idx: u32,
    /// Start position.
    pub start: Pos,
}

/// Error submitting a job.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The pool has been asked to stop; no further jobs are accepted.
    Stopped,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "worker pool is stopping"),
        }
    }
}

impl Error for SubmitError {}

struct PoolState {
    queue: VecDeque<Job>,
    in_flight: u32,
    stop: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    nonempty: Condvar,
    all_done: Condvar,
    capacity: usize,
    grid: Arc<Grid>,
    aggregate: Arc<Aggregate>,
    thresholds: Thresholds,
    max_steps: u32,
}

/// Fixed pool of trajectory workers.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers over a queue of at least
    /// [`MIN_QUEUE_CAPACITY`] slots. Thread-create failure at init is
    /// fatal, matching startup-allocation policy.
    pub fn new(
        threads: usize,
        queue_capacity: usize,
        grid: Arc<Grid>,
        aggregate: Arc<Aggregate>,
        thresholds: Thresholds,
        max_steps: u32,
    ) -> Self {
        let threads = threads.max(1);
        let capacity = queue_capacity.max(MIN_QUEUE_CAPACITY);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::with_capacity(capacity),
                in_flight: 0,
                stop: false,
            }),
            nonempty: Condvar::new(),
            all_done: Condvar::new(),
            capacity,
            grid,
            aggregate,
            thresholds,
            max_steps,
        });

        let workers = (0..threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("meander-walk-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn walk worker")
            })
            .collect();

        Self { shared, workers }
    }

    /// Enqueue one job. Blocks (cooperatively, via spin-yield) while the
    /// queue is full; fails only after a stop request.
    pub fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let mut state = self.shared.state.lock().unwrap();
        while !state.stop && state.queue.len() >= self.shared.capacity {
            drop(state);
            thread::yield_now();
            state = self.shared.state.lock().unwrap();
        }
        if state.stop {
            return Err(SubmitError::Stopped);
        }
        state.queue.push_back(job);
        state.in_flight += 1;
        self.shared.nonempty.notify_one();
        Ok(())
    }

    /// Block until every submitted job has completed.
    pub fn wait_all(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.in_flight > 0 {
            state = self.shared.all_done.wait(state).unwrap();
        }
    }

    /// Request a cooperative stop: workers drain their current trajectory
    /// and exit; queued jobs are discarded at join time.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.stop = true;
        self.shared.nonempty.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    let mut rng = WalkRng::from_entropy_mix();
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.stop {
                    return;
                }
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                state = shared.nonempty.wait(state).unwrap();
            }
        };

        let outcome = run_walk(
            &shared.grid,
            job.start,
            &shared.thresholds,
            shared.max_steps,
            &mut rng,
        );
        trace!(cell = job.cell_idx, steps = outcome.steps, "walk done");
        shared.aggregate.update(
            job.cell_idx,
            CellUpdate {
                steps: outcome.steps,
                reached_origin: outcome.reached_origin,
                success_leq_k: outcome.success_leq_k,
            },
        );

        let mut state = shared.state.lock().unwrap();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            shared.all_done.notify_all();
        }
    }
}
