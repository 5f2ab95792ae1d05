//! Shared server state: client registry, control-plane state, world store.
//!
//! Two independent mutexes per the concurrency model: one for the client
//! registry, one for the control state (sim state, progress, mode, owner,
//! config). They are never held nested; registry and control accessors
//! each acquire only their own lock. The world store (grid + aggregate
//! arcs) has a third, briefly-held lock; a published `Arc<Grid>` is never
//! mutated, only replaced while no batch is running.
//!
//! No lock is ever held across a blocking socket write: broadcast uses
//! the best-effort non-blocking variant under the registry lock, and
//! snapshot streams clone the entry arcs out first.

use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use meander_engine::StateSink;
use meander_proto::{
    frame, GlobalMode, GridSize, Message, MoveProbs, Pos, ProtoError, SimState, Status, Welcome,
    WorldKind,
};
use meander_world::{Aggregate, Grid, WorldError};
use tracing::{debug, warn};

/// Maximum simultaneously connected clients.
pub const MAX_CLIENTS: usize = 32;

/// Registry key for one connection.
pub type ClientId = u64;

// ── ClientEntry ──────────────────────────────────────────────────

/// One registered connection. The handler thread owns the read half of
/// the socket; all writes (replies, broadcasts, snapshot streams) go
/// through the writer mutex here so frames never interleave.
pub struct ClientEntry {
    /// Registry key.
    pub id: ClientId,
    /// PID the client self-identified with at JOIN.
    pub pid: u32,
    writer: Mutex<UnixStream>,
}

impl ClientEntry {
    /// Blocking send of one frame.
    pub fn send(&self, msg: &Message) -> Result<(), ProtoError> {
        let stream = self.writer.lock().unwrap();
        frame::send_msg(&stream, msg)
    }

    /// Best-effort send: drops the frame instead of blocking on a slow
    /// consumer. A writer busy with a snapshot stream counts as
    /// would-block, so broadcasts never queue behind bulk transfers.
    pub fn try_send(&self, msg: &Message) -> Result<(), ProtoError> {
        match self.writer.try_lock() {
            Ok(stream) => frame::try_send_msg(&stream, msg),
            Err(_) => Err(ProtoError::WouldBlock),
        }
    }

    /// Run a multi-frame write sequence (a snapshot stream) under the
    /// writer lock so nothing interleaves with it.
    pub fn with_writer<R>(&self, f: impl FnOnce(&UnixStream) -> R) -> R {
        let stream = self.writer.lock().unwrap();
        f(&stream)
    }

    /// Shut the socket down in both directions, unblocking the handler
    /// thread's read.
    pub fn shutdown(&self) {
        let stream = self.writer.lock().unwrap();
        let _ = stream.shutdown(Shutdown::Both);
    }
}

// ── Config & control state ───────────────────────────────────────

/// The configurable simulation parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimConfig {
    /// World kind.
    pub world_kind: WorldKind,
    /// World dimensions.
    pub size: GridSize,
    /// Move distribution.
    pub probs: MoveProbs,
    /// Step cap per trajectory.
    pub k_max_steps: u32,
    /// Replications per batch.
    pub total_reps: u32,
    /// Informational multi-user flag; never widens capabilities.
    pub multi_user: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            world_kind: WorldKind::Wrap,
            size: GridSize::new(10, 10),
            probs: MoveProbs::UNIFORM,
            k_max_steps: 100,
            total_reps: 1,
            multi_user: false,
        }
    }
}

struct ControlState {
    sim_state: SimState,
    current_rep: u32,
    mode: GlobalMode,
    owner: Option<ClientId>,
    config: SimConfig,
}

struct WorldStore {
    grid: Arc<Grid>,
    aggregate: Arc<Aggregate>,
}

// ── ServerContext ────────────────────────────────────────────────

/// Shared server state, passed by `Arc` to every thread.
pub struct ServerContext {
    clients: Mutex<IndexMap<ClientId, Arc<ClientEntry>>>,
    control: Mutex<ControlState>,
    world: Mutex<WorldStore>,
    next_client_id: AtomicU64,
}

impl ServerContext {
    /// Create a context with the default configuration and a matching
    /// all-free world.
    pub fn new() -> Result<Self, WorldError> {
        let config = SimConfig::default();
        let grid = Arc::new(Grid::new(config.world_kind, config.size)?);
        let aggregate = Arc::new(Aggregate::new(config.size)?);
        Ok(Self {
            clients: Mutex::new(IndexMap::new()),
            control: Mutex::new(ControlState {
                sim_state: SimState::Lobby,
                current_rep: 0,
                mode: GlobalMode::Summary,
                owner: None,
                config,
            }),
            world: Mutex::new(WorldStore { grid, aggregate }),
            next_client_id: AtomicU64::new(1),
        })
    }

    // ── Registry ────────────────────────────────────────────────

    /// Register a connection. The first client (or the first after the
    /// owner left) becomes owner. Fails when the registry is full.
    pub fn add_client(&self, pid: u32, writer: UnixStream) -> Option<Arc<ClientEntry>> {
        let entry = {
            let mut clients = self.clients.lock().unwrap();
            if clients.len() >= MAX_CLIENTS {
                return None;
            }
            let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            let entry = Arc::new(ClientEntry {
                id,
                pid,
                writer: Mutex::new(writer),
            });
            clients.insert(id, Arc::clone(&entry));
            entry
        };
        let mut control = self.control.lock().unwrap();
        if control.owner.is_none() {
            control.owner = Some(entry.id);
            debug!(pid, id = entry.id, "client becomes owner");
        }
        Some(entry)
    }

    /// Remove a connection; clears ownership if the owner left.
    pub fn remove_client(&self, id: ClientId) {
        let removed = self.clients.lock().unwrap().shift_remove(&id);
        if removed.is_some() {
            let mut control = self.control.lock().unwrap();
            if control.owner == Some(id) {
                control.owner = None;
                debug!(id, "owner disconnected, ownership cleared");
            }
        }
    }

    /// Whether `id` may invoke control operations: ownership is unset
    /// (first-arrival grace) or `id` is the owner.
    pub fn client_can_control(&self, id: ClientId) -> bool {
        let control = self.control.lock().unwrap();
        control.owner.is_none() || control.owner == Some(id)
    }

    /// Whether `id` is the current owner (no first-arrival grace).
    pub fn is_owner(&self, id: ClientId) -> bool {
        self.control.lock().unwrap().owner == Some(id)
    }

    /// Connected client count.
    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Best-effort broadcast to every client. Holding the registry lock
    /// is safe here precisely because the send variant cannot block.
    pub fn broadcast(&self, msg: &Message) {
        let clients = self.clients.lock().unwrap();
        for entry in clients.values() {
            match entry.try_send(msg) {
                Ok(()) => {}
                Err(ProtoError::WouldBlock) => {
                    debug!(pid = entry.pid, "notification dropped (would block)");
                }
                Err(e) => {
                    // A broken client is cleaned up by its own handler.
                    warn!(pid = entry.pid, error = %e, "broadcast send failed");
                }
            }
        }
    }

    /// Clone out every entry for sequential blocking work (snapshots).
    pub fn client_entries(&self) -> Vec<Arc<ClientEntry>> {
        self.clients.lock().unwrap().values().cloned().collect()
    }

    /// Shut down every client socket (server shutdown path).
    pub fn shutdown_all_clients(&self) {
        for entry in self.client_entries() {
            entry.shutdown();
        }
    }

    // ── Control state ───────────────────────────────────────────

    /// Current simulation state.
    pub fn sim_state(&self) -> SimState {
        self.control.lock().unwrap().sim_state
    }

    /// Completed-replication progress.
    pub fn current_rep(&self) -> u32 {
        self.control.lock().unwrap().current_rep
    }

    /// Current global mode.
    pub fn mode(&self) -> GlobalMode {
        self.control.lock().unwrap().mode
    }

    /// Set the global mode.
    pub fn set_mode(&self, mode: GlobalMode) {
        self.control.lock().unwrap().mode = mode;
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> SimConfig {
        self.control.lock().unwrap().config
    }

    /// Replace the configuration.
    pub fn set_config(&self, config: SimConfig) {
        self.control.lock().unwrap().config = config;
    }

    /// Reset state/progress for a fresh lobby (after CREATE or LOAD_WORLD).
    pub fn reset_to_lobby(&self) {
        let mut control = self.control.lock().unwrap();
        control.sim_state = SimState::Lobby;
        control.current_rep = 0;
    }

    /// Publish loaded results: config overwritten, state FINISHED,
    /// progress pinned to the file's replication count.
    pub fn apply_loaded_results(&self, config: SimConfig) {
        let mut control = self.control.lock().unwrap();
        control.current_rep = config.total_reps;
        control.config = config;
        control.sim_state = SimState::Finished;
    }

    // ── World store ─────────────────────────────────────────────

    /// The current grid and aggregate arcs.
    pub fn world(&self) -> (Arc<Grid>, Arc<Aggregate>) {
        let store = self.world.lock().unwrap();
        (Arc::clone(&store.grid), Arc::clone(&store.aggregate))
    }

    /// Replace grid and aggregate. Only called while no batch is active.
    pub fn set_world(&self, grid: Arc<Grid>, aggregate: Arc<Aggregate>) {
        let mut store = self.world.lock().unwrap();
        store.grid = grid;
        store.aggregate = aggregate;
    }

    // ── Wire views ──────────────────────────────────────────────

    /// Build the WELCOME payload for a new connection.
    pub fn welcome(&self) -> Welcome {
        let control = self.control.lock().unwrap();
        Welcome {
            world_kind: control.config.world_kind,
            size: control.config.size,
            probs: control.config.probs,
            k_max_steps: control.config.k_max_steps,
            total_reps: control.config.total_reps,
            current_rep: control.current_rep,
            mode: control.mode,
            origin: Pos::ORIGIN,
        }
    }

    /// Build the STATUS payload.
    pub fn status(&self) -> Status {
        let (owner, snapshot) = {
            let control = self.control.lock().unwrap();
            (
                control.owner,
                Status {
                    sim_state: control.sim_state,
                    world_kind: control.config.world_kind,
                    size: control.config.size,
                    probs: control.config.probs,
                    k_max_steps: control.config.k_max_steps,
                    total_reps: control.config.total_reps,
                    current_rep: control.current_rep,
                    mode: control.mode,
                    multi_user: control.config.multi_user,
                    client_count: 0,
                    owner_pid: 0,
                },
            )
        };
        let clients = self.clients.lock().unwrap();
        let owner_pid = owner
            .and_then(|id| clients.get(&id))
            .map(|entry| entry.pid)
            .unwrap_or(0);
        Status {
            client_count: clients.len() as u32,
            owner_pid,
            ..snapshot
        }
    }
}

impl StateSink for ServerContext {
    fn set_sim_state(&self, state: SimState) {
        self.control.lock().unwrap().sim_state = state;
    }

    fn set_progress(&self, current_rep: u32) {
        self.control.lock().unwrap().current_rep = current_rep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> UnixStream {
        UnixStream::pair().unwrap().0
    }

    #[test]
    fn first_client_becomes_owner_and_grace_after_leave() {
        let ctx = ServerContext::new().unwrap();
        let a = ctx.add_client(100, pair()).unwrap();
        let b = ctx.add_client(200, pair()).unwrap();
        assert!(ctx.client_can_control(a.id));
        assert!(!ctx.client_can_control(b.id));

        // Owner leaves: ownership cleared, remaining clients get the
        // first-arrival grace until someone new joins.
        ctx.remove_client(a.id);
        assert!(ctx.client_can_control(b.id));

        let c = ctx.add_client(300, pair()).unwrap();
        assert!(ctx.client_can_control(c.id));
        assert!(!ctx.client_can_control(b.id));
    }

    #[test]
    fn registry_is_bounded() {
        let ctx = ServerContext::new().unwrap();
        let mut entries = Vec::new();
        for i in 0..MAX_CLIENTS {
            entries.push(ctx.add_client(i as u32, pair()).unwrap());
        }
        assert!(ctx.add_client(9999, pair()).is_none());
        ctx.remove_client(entries[0].id);
        assert!(ctx.add_client(9999, pair()).is_some());
    }

    #[test]
    fn status_reflects_owner_pid_and_count() {
        let ctx = ServerContext::new().unwrap();
        assert_eq!(ctx.status().owner_pid, 0);
        let a = ctx.add_client(4321, pair()).unwrap();
        let _b = ctx.add_client(8765, pair()).unwrap();
        let status = ctx.status();
        assert_eq!(status.owner_pid, 4321);
        assert_eq!(status.client_count, 2);
        assert_eq!(status.sim_state, SimState::Lobby);
        ctx.remove_client(a.id);
        assert_eq!(ctx.status().owner_pid, 0);
    }

    #[test]
    fn loaded_results_pin_progress_to_file_reps() {
        let ctx = ServerContext::new().unwrap();
        let config = SimConfig {
            total_reps: 77,
            ..SimConfig::default()
        };
        ctx.apply_loaded_results(config);
        assert_eq!(ctx.sim_state(), SimState::Finished);
        assert_eq!(ctx.current_rep(), 77);
        assert_eq!(ctx.config().total_reps, 77);
    }
}
