//! The replication manager: one background thread per batch.
//!
//! On start the thread publishes RUNNING, builds the worker pool, clears
//! the aggregate, and fans out one job per non-blocked cell for each
//! replication. Progress is published after every replication's
//! `wait_all`, including one cut short mid-fan-out; a cooperative stop
//! flag is checked between cells and between replications, and
//! in-flight trajectories always finish. When the loop
//! exits the pool is torn down, FINISHED is published, and an end event
//! is emitted with the stop disposition.
//!
//! State writes flow through [`StateSink`] (implemented by the server
//! context); notifications flow over a crossbeam channel drained by the
//! server's notifier thread. The manager never touches a socket.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use meander_proto::{MoveProbs, SimState};
use meander_world::{Aggregate, Grid};
use tracing::{debug, info};

use crate::pool::{Job, WorkerPool};
use crate::walk::Thresholds;

// ── StateSink ────────────────────────────────────────────────────

/// Where the manager publishes state and progress. Implemented by the
/// server context, which guards both under its control-state mutex.
pub trait StateSink: Send + Sync + 'static {
    /// Publish a control-plane state transition.
    fn set_sim_state(&self, state: SimState);
    /// Publish completed-replication progress.
    fn set_progress(&self, current_rep: u32);
}

// ── Events ───────────────────────────────────────────────────────

/// Asynchronous notifications emitted by the manager thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimEvent {
    /// One replication completed.
    Progress {
        /// Replications completed so far.
        current_rep: u32,
        /// Replications configured.
        total_reps: u32,
    },
    /// The batch ended.
    Ended {
        /// True when a stop request cut the batch short.
        stopped: bool,
    },
}

// ── RunSpec ──────────────────────────────────────────────────────

/// Everything one batch needs, captured at start time. The grid and
/// aggregate arcs pin the world for the duration of the run; the control
/// plane never swaps them while a batch is active.
#[derive(Clone)]
pub struct RunSpec {
    /// World to walk on.
    pub grid: Arc<Grid>,
    /// Accumulator to update.
    pub aggregate: Arc<Aggregate>,
    /// Move distribution for every trajectory.
    pub probs: MoveProbs,
    /// Step cap per trajectory.
    pub k_max_steps: u32,
    /// Replications to run.
    pub total_reps: u32,
    /// Worker thread count.
    pub worker_threads: usize,
    /// Job queue capacity.
    pub queue_capacity: usize,
}

// ── Errors ───────────────────────────────────────────────────────

/// Error starting or restarting a batch.
#[derive(Debug, PartialEq, Eq)]
pub enum StartError {
    /// A batch is already running.
    AlreadyRunning,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "a batch is already running"),
        }
    }
}

impl Error for StartError {}

// ── SimManager ───────────────────────────────────────────────────

/// Owns the background replication thread.
pub struct SimManager {
    sink: Arc<dyn StateSink>,
    events: Sender<SimEvent>,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SimManager {
    /// Create a manager publishing into `sink` and `events`.
    pub fn new(sink: Arc<dyn StateSink>, events: Sender<SimEvent>) -> Self {
        Self {
            sink,
            events,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Whether a batch is active. Set synchronously by [`start`] before it
    /// returns, so callers can use it for state-conflict guards without
    /// racing the background thread's RUNNING publication.
    ///
    /// [`start`]: SimManager::start
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Request a cooperative stop. Safe from any thread; checked between
    /// cells and between replications.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Start a batch. Fails if one is already active.
    pub fn start(&self, spec: RunSpec) -> Result<(), StartError> {
        let mut slot = self.thread.lock().unwrap();
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(StartError::AlreadyRunning);
        }
        // The previous thread (if any) has already cleared `running`;
        // reap its handle before spawning the next one.
        if let Some(handle) = slot.take() {
            let _ = handle.join();
        }
        self.stop.store(false, Ordering::Release);

        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();
        let running = Arc::clone(&self.running);
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("meander-sim".into())
            .spawn(move || run_batch(&spec, &sink, &events, &stop, &running))
            .expect("failed to spawn simulation thread");
        *slot = Some(handle);
        Ok(())
    }

    /// Restart with fresh replication counts: progress and state are reset
    /// to the lobby, then the batch starts. Valid only while not running.
    pub fn restart(&self, spec: RunSpec) -> Result<(), StartError> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }
        self.sink.set_progress(0);
        self.sink.set_sim_state(SimState::Lobby);
        self.start(spec)
    }

    /// Join the batch thread if one has finished or is finishing.
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for SimManager {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
    }
}

// ── Batch body ───────────────────────────────────────────────────

fn run_batch(
    spec: &RunSpec,
    sink: &Arc<dyn StateSink>,
    events: &Sender<SimEvent>,
    stop: &AtomicBool,
    running: &AtomicBool,
) {
    sink.set_sim_state(SimState::Running);
    sink.set_progress(0);

    let thresholds = Thresholds::from_probs(&spec.probs);
    let pool = WorkerPool::new(
        spec.worker_threads,
        spec.queue_capacity,
        Arc::clone(&spec.grid),
        Arc::clone(&spec.aggregate),
        thresholds,
        spec.k_max_steps,
    );

    // Counters accumulate over the whole batch; clear leftovers from any
    // previous run.
    spec.aggregate.clear();

    let width = spec.grid.size().width as i32;
    let height = spec.grid.size().height as i32;
    let mut stopped = false;

    'reps: for rep in 1..=spec.total_reps {
        if stop.load(Ordering::Acquire) {
            stopped = true;
            break 'reps;
        }

        let mut interrupted = false;
        'cells: for y in 0..height {
            for x in 0..width {
                if stop.load(Ordering::Acquire) {
                    interrupted = true;
                    break 'cells;
                }
                if spec.grid.is_obstacle_xy(x, y) {
                    continue;
                }
                let job = Job {
                    cell_idx: spec.grid.index(x, y),
                    start: meander_proto::Pos::new(x, y),
                };
                if pool.submit(job).is_err() {
                    interrupted = true;
                    break 'cells;
                }
            }
        }

        // In-flight trajectories always complete, stop or not. Progress
        // is published for every replication that reached wait_all, a
        // partial one included; only the loops are gated on the stop flag.
        pool.wait_all();
        sink.set_progress(rep);
        let _ = events.send(SimEvent::Progress {
            current_rep: rep,
            total_reps: spec.total_reps,
        });
        debug!(rep, total = spec.total_reps, interrupted, "replication completed");

        if interrupted {
            stopped = true;
            break 'reps;
        }
    }

    drop(pool);
    sink.set_sim_state(SimState::Finished);
    running.store(false, Ordering::Release);
    info!(stopped, "batch finished");
    let _ = events.send(SimEvent::Ended { stopped });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use meander_proto::{GridSize, WorldKind};
    use std::sync::atomic::AtomicU32;
    use std::time::{Duration, Instant};

    /// Test sink recording the latest state and progress.
    struct RecordingSink {
        state: Mutex<SimState>,
        progress: AtomicU32,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(SimState::Lobby),
                progress: AtomicU32::new(0),
            })
        }

        fn state(&self) -> SimState {
            *self.state.lock().unwrap()
        }
    }

    impl StateSink for RecordingSink {
        fn set_sim_state(&self, state: SimState) {
            *self.state.lock().unwrap() = state;
        }

        fn set_progress(&self, current_rep: u32) {
            self.progress.store(current_rep, Ordering::Release);
        }
    }

    fn spec(w: u32, h: u32, reps: u32, k: u32) -> RunSpec {
        RunSpec {
            grid: Arc::new(Grid::new(WorldKind::Wrap, GridSize::new(w, h)).unwrap()),
            aggregate: Arc::new(Aggregate::new(GridSize::new(w, h)).unwrap()),
            probs: MoveProbs::UNIFORM,
            k_max_steps: k,
            total_reps: reps,
            worker_threads: 2,
            queue_capacity: 64,
        }
    }

    fn wait_until_finished(sink: &RecordingSink, manager: &SimManager) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while sink.state() != SimState::Finished {
            assert!(Instant::now() < deadline, "batch never finished");
            thread::sleep(Duration::from_millis(5));
        }
        manager.join();
    }

    #[test]
    fn completed_batch_conserves_trials() {
        let sink = RecordingSink::new();
        let (tx, rx) = unbounded();
        let manager = SimManager::new(sink.clone(), tx);
        let run = spec(3, 3, 10, 16);
        let aggregate = Arc::clone(&run.aggregate);
        manager.start(run).unwrap();
        wait_until_finished(&sink, &manager);

        // 9 free cells × 10 reps, origin included with zero-step successes.
        let trials = aggregate.trials();
        assert_eq!(trials.iter().sum::<u32>(), 90);
        assert!(trials.iter().all(|&t| t == 10));
        assert_eq!(aggregate.successes()[0], 10);
        assert_eq!(aggregate.sum_steps()[0], 0);
        assert_eq!(sink.progress.load(Ordering::Acquire), 10);

        // Progress events arrive in replication order, then the end event.
        let events: Vec<_> = rx.try_iter().collect();
        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Progress { current_rep, .. } => Some(*current_rep),
                _ => None,
            })
            .collect();
        assert_eq!(progress, (1..=10).collect::<Vec<_>>());
        assert_eq!(events.last(), Some(&SimEvent::Ended { stopped: false }));
    }

    #[test]
    fn obstacles_are_skipped() {
        let sink = RecordingSink::new();
        let (tx, _rx) = unbounded();
        let manager = SimManager::new(sink.clone(), tx);

        let mut grid = Grid::new(WorldKind::Obstacles, GridSize::new(3, 3)).unwrap();
        grid.set_obstacle(1, 1, true);
        grid.set_obstacle(2, 0, true);
        let run = RunSpec {
            grid: Arc::new(grid),
            ..spec(3, 3, 4, 16)
        };
        let aggregate = Arc::clone(&run.aggregate);
        let blocked = [run.grid.index(1, 1), run.grid.index(2, 0)];
        manager.start(run).unwrap();
        wait_until_finished(&sink, &manager);

        let trials = aggregate.trials();
        assert_eq!(trials.iter().sum::<u32>(), 7 * 4);
        for idx in blocked {
            assert_eq!(trials[idx as usize], 0);
        }
    }

    #[test]
    fn start_while_running_is_rejected() {
        let sink = RecordingSink::new();
        let (tx, _rx) = unbounded();
        let manager = SimManager::new(sink.clone(), tx);
        manager.start(spec(16, 16, 500, 256)).unwrap();
        assert_eq!(
            manager.start(spec(3, 3, 1, 4)),
            Err(StartError::AlreadyRunning)
        );
        manager.request_stop();
        wait_until_finished(&sink, &manager);
    }

    #[test]
    fn stop_request_ends_a_long_batch() {
        let sink = RecordingSink::new();
        let (tx, rx) = unbounded();
        let manager = SimManager::new(sink.clone(), tx);
        let run = spec(8, 8, 1_000_000, 64);
        let total = run.total_reps;
        let aggregate = Arc::clone(&run.aggregate);
        manager.start(run).unwrap();

        thread::sleep(Duration::from_millis(100));
        manager.request_stop();
        wait_until_finished(&sink, &manager);

        assert!(!manager.is_running());
        let published = sink.progress.load(Ordering::Acquire);
        assert!(published <= total);
        let trials = aggregate.trials();
        let successes = aggregate.successes();
        for i in 0..trials.len() {
            assert!(successes[i] <= trials[i]);
        }

        // Progress is published for every replication that reached
        // wait_all, the interrupted one included, so the event stream is
        // contiguous and its last entry matches the sink.
        let events: Vec<_> = rx.try_iter().collect();
        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Progress { current_rep, .. } => Some(*current_rep),
                _ => None,
            })
            .collect();
        assert_eq!(progress, (1..=published).collect::<Vec<_>>());
        assert_eq!(events.last(), Some(&SimEvent::Ended { stopped: true }));
    }

    #[test]
    fn restart_runs_a_fresh_batch() {
        let sink = RecordingSink::new();
        let (tx, _rx) = unbounded();
        let manager = SimManager::new(sink.clone(), tx);
        let run = spec(3, 3, 5, 16);
        let aggregate = Arc::clone(&run.aggregate);
        manager.start(run.clone()).unwrap();
        wait_until_finished(&sink, &manager);
        assert_eq!(aggregate.trials().iter().sum::<u32>(), 45);

        // Restart with fewer reps; the aggregate is cleared at batch start.
        let rerun = RunSpec {
            total_reps: 2,
            ..run
        };
        manager.restart(rerun).unwrap();
        wait_until_finished(&sink, &manager);
        assert_eq!(aggregate.trials().iter().sum::<u32>(), 18);
    }
}
