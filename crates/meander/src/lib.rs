//! Meander: client/server Monte-Carlo random-walk simulation on a 2D grid.
//!
//! This is the facade crate re-exporting the public API of the Meander
//! workspace. Adding `meander` as a single dependency is sufficient for
//! most users.
//!
//! # Quick start
//!
//! ```no_run
//! use meander::prelude::*;
//!
//! // Serve on a socket path.
//! let server = Server::start(ServerConfig::at_path("/tmp/meander.sock")).unwrap();
//!
//! // Drive it from a client.
//! let client = Client::connect(server.socket_path()).unwrap();
//! client.create_sim(CreateSim {
//!     world_kind: WorldKind::Wrap,
//!     size: GridSize::new(16, 16),
//!     probs: MoveProbs::UNIFORM,
//!     k_max_steps: 100,
//!     total_reps: 50,
//!     multi_user: false,
//!     obstacle_percent: 0,
//!     obstacle_seed: 0,
//! }).unwrap();
//! client.start_sim().unwrap();
//! let status = client.wait_until_state(SimState::Finished,
//!     std::time::Duration::from_secs(60)).unwrap();
//! assert_eq!(status.current_rep, 50);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`proto`] | `meander-proto` | Message catalogue, framed codec, error taxonomy |
//! | [`world`] | `meander-world` | Grid, obstacle generation, aggregate store |
//! | [`engine`] | `meander-engine` | Trajectories, worker pool, replication manager |
//! | [`server`] | `meander-server` | Control plane, IPC loop, snapshots, persistence |
//! | [`client`] | `meander-client` | Dispatcher, snapshot assembly, typed requests |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Wire protocol: message catalogue, framing, error taxonomy (`meander-proto`).
pub use meander_proto as proto;

/// World geometry and per-cell statistics (`meander-world`).
pub use meander_world as world;

/// Trajectory engine, worker pool, replication manager (`meander-engine`).
pub use meander_engine as engine;

/// Server: control plane, IPC, snapshots, persistence (`meander-server`).
pub use meander_server as server;

/// Client: dispatcher, snapshot assembly, typed requests (`meander-client`).
pub use meander_client as client;

/// Common imports for typical Meander usage.
pub mod prelude {
    pub use meander_client::{Client, SnapshotData};
    pub use meander_engine::{RunSpec, SimManager, WalkRng};
    pub use meander_proto::{
        CreateSim, EndReason, ErrorCode, GlobalMode, GridSize, Message, MoveProbs, MsgType, Pos,
        SimState, SnapshotField, Status, Welcome, WorldKind,
    };
    pub use meander_server::{Server, ServerConfig};
    pub use meander_world::{Aggregate, Grid};
}
