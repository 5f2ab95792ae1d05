//! Simulation engine: trajectory execution, worker pool, and the
//! replication manager.
//!
//! One trajectory is a random walk from a start cell toward the origin,
//! capped at K steps. A batch fans out one trajectory per non-blocked
//! cell, repeated `total_reps` times, across a fixed pool of worker
//! threads that accumulate outcomes into the shared [`meander_world::Aggregate`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod manager;
pub mod pool;
pub mod rng;
pub mod walk;

pub use manager::{RunSpec, SimEvent, SimManager, StartError, StateSink};
pub use pool::{Job, SubmitError, WorkerPool};
pub use rng::WalkRng;
pub use walk::{run_walk, Thresholds, WalkOutcome};
