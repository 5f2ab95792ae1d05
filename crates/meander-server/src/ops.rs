//! Control request handlers.
//!
//! Each handler validates capability and state-machine guards, performs
//! the operation, and returns either success or a taxonomy code with an
//! advisory message. The IPC layer turns that into exactly one ACK or
//! ERROR reply. Handlers never hold a context lock across socket I/O.

use std::path::Path;
use std::sync::Arc;

use meander_engine::RunSpec;
use meander_proto::{CreateSim, ErrorCode, GlobalMode, Message, SimState};
use meander_world::{Aggregate, Grid};
use tracing::{info, warn};

use crate::context::{ClientEntry, SimConfig};
use crate::persist;
use crate::server::ServerShared;

pub(crate) type OpResult = Result<(), (ErrorCode, String)>;

// ── Guards ───────────────────────────────────────────────────────

fn guard_owner(shared: &ServerShared, client: &ClientEntry) -> OpResult {
    if shared.ctx.client_can_control(client.id) {
        Ok(())
    } else {
        Err((
            ErrorCode::PermissionDenied,
            "only the session owner may control the simulation".into(),
        ))
    }
}

/// The manager's running flag is set synchronously by `start`, so this
/// guard has no window against a batch the state machine has not
/// published yet.
fn guard_not_running(shared: &ServerShared) -> OpResult {
    if shared.manager.is_running() || shared.ctx.sim_state() == SimState::Running {
        Err((
            ErrorCode::StateConflict,
            "a simulation batch is running".into(),
        ))
    } else {
        Ok(())
    }
}

fn run_spec(shared: &ServerShared) -> RunSpec {
    let config = shared.ctx.config();
    let (grid, aggregate) = shared.ctx.world();
    RunSpec {
        grid,
        aggregate,
        probs: config.probs,
        k_max_steps: config.k_max_steps,
        total_reps: config.total_reps,
        worker_threads: shared.worker_threads,
        queue_capacity: shared.queue_capacity,
    }
}

// ── Handlers ─────────────────────────────────────────────────────

pub(crate) fn create_sim(
    shared: &ServerShared,
    client: &ClientEntry,
    req: &CreateSim,
) -> OpResult {
    guard_owner(shared, client)?;
    guard_not_running(shared)?;

    if req.size.width == 0 || req.size.height == 0 || req.total_reps == 0 || req.k_max_steps == 0
    {
        return Err((
            ErrorCode::InvalidParams,
            "dimensions, replications and step cap must be non-zero".into(),
        ));
    }
    if !req.probs.is_valid() {
        return Err((
            ErrorCode::BadProbabilitySum,
            format!("probability sum {:.6} outside [0.999, 1.001]", req.probs.sum()),
        ));
    }

    let mut grid = Grid::new(req.world_kind, req.size)
        .map_err(|e| (ErrorCode::WorldInitFailed, e.to_string()))?;
    if req.world_kind == meander_proto::WorldKind::Obstacles {
        grid.generate_obstacles(req.obstacle_percent, req.obstacle_seed);
    }
    let aggregate =
        Aggregate::new(req.size).map_err(|e| (ErrorCode::AggregateInitFailed, e.to_string()))?;

    shared.ctx.set_config(SimConfig {
        world_kind: req.world_kind,
        size: req.size,
        probs: req.probs,
        k_max_steps: req.k_max_steps,
        total_reps: req.total_reps,
        multi_user: req.multi_user,
    });
    shared.ctx.set_world(Arc::new(grid), Arc::new(aggregate));
    shared.ctx.reset_to_lobby();
    info!(
        kind = %req.world_kind,
        width = req.size.width,
        height = req.size.height,
        reps = req.total_reps,
        "simulation configured"
    );
    Ok(())
}

pub(crate) fn start_sim(shared: &ServerShared, client: &ClientEntry) -> OpResult {
    guard_owner(shared, client)?;
    guard_not_running(shared)?;
    // START_SIM transitions LOBBY → RUNNING only; RESTART_SIM is the
    // path out of FINISHED.
    if shared.ctx.sim_state() != SimState::Lobby {
        return Err((
            ErrorCode::StateConflict,
            "batch already finished; use restart".into(),
        ));
    }
    shared
        .manager
        .start(run_spec(shared))
        .map_err(|e| (ErrorCode::StartFailed, e.to_string()))
}

pub(crate) fn restart_sim(
    shared: &ServerShared,
    client: &ClientEntry,
    total_reps: u32,
) -> OpResult {
    guard_owner(shared, client)?;
    guard_not_running(shared)?;
    if total_reps == 0 {
        return Err((
            ErrorCode::InvalidParams,
            "replication count must be non-zero".into(),
        ));
    }
    let mut config = shared.ctx.config();
    config.total_reps = total_reps;
    shared.ctx.set_config(config);
    shared
        .manager
        .restart(run_spec(shared))
        .map_err(|e| (ErrorCode::StartFailed, e.to_string()))
}

pub(crate) fn stop_sim(shared: &ServerShared, client: &ClientEntry) -> OpResult {
    guard_owner(shared, client)?;
    shared.manager.request_stop();
    info!(pid = client.pid, "stop requested");
    Ok(())
}

pub(crate) fn load_world(
    shared: &ServerShared,
    client: &ClientEntry,
    path: &str,
    multi_user: bool,
) -> OpResult {
    guard_owner(shared, client)?;
    guard_not_running(shared)?;

    let file = persist::load_file(Path::new(path))
        .map_err(|e| (ErrorCode::LoadWorldFailed, e.to_string()))?;
    let grid = file
        .build_grid()
        .map_err(|e| (ErrorCode::LoadWorldFailed, e.to_string()))?;
    // Geometry only: the aggregate restarts zeroed at the new dimensions.
    let aggregate = Aggregate::new(file.config.size)
        .map_err(|e| (ErrorCode::AggregateInitFailed, e.to_string()))?;

    let mut config = shared.ctx.config();
    config.world_kind = file.config.world_kind;
    config.size = file.config.size;
    config.multi_user = multi_user;
    shared.ctx.set_config(config);
    shared.ctx.set_world(Arc::new(grid), Arc::new(aggregate));
    shared.ctx.reset_to_lobby();
    info!(path, "world loaded");
    Ok(())
}

pub(crate) fn load_results(shared: &ServerShared, client: &ClientEntry, path: &str) -> OpResult {
    guard_owner(shared, client)?;
    // The table allows LOAD_RESULTS from any settled state; a running
    // batch still owns the aggregate, so it must finish or stop first.
    guard_not_running(shared)?;

    let file =
        persist::load_file(Path::new(path)).map_err(|e| (ErrorCode::LoadFailed, e.to_string()))?;
    let grid = file
        .build_grid()
        .map_err(|e| (ErrorCode::LoadFailed, e.to_string()))?;
    let aggregate = file
        .build_aggregate()
        .map_err(|e| (ErrorCode::LoadFailed, e.to_string()))?;

    let mut config = file.config;
    config.multi_user = shared.ctx.config().multi_user;
    shared.ctx.set_world(Arc::new(grid), Arc::new(aggregate));
    shared.ctx.apply_loaded_results(config);
    info!(path, "results loaded");
    Ok(())
}

pub(crate) fn save_results(shared: &ServerShared, client: &ClientEntry, path: &str) -> OpResult {
    guard_owner(shared, client)?;
    if shared.ctx.sim_state() != SimState::Finished && shared.ctx.current_rep() == 0 {
        return Err((
            ErrorCode::NothingToSave,
            "no completed replications to save".into(),
        ));
    }

    let config = shared.ctx.config();
    let (grid, aggregate) = shared.ctx.world();
    persist::save_results(Path::new(path), &config, &grid, &aggregate)
        .map_err(|e| (ErrorCode::SaveFailed, e.to_string()))
}

/// SET_GLOBAL_MODE has no direct reply; the change is confirmed by a
/// GLOBAL_MODE_CHANGED broadcast to every client, sender included.
pub(crate) fn set_global_mode(shared: &ServerShared, client: &ClientEntry, mode: GlobalMode) {
    shared.ctx.set_mode(mode);
    shared.ctx.broadcast(&Message::GlobalModeChanged {
        mode,
        changed_by_pid: client.pid,
    });
    info!(pid = client.pid, mode = ?mode, "global mode changed");
}

/// Stream a snapshot to the requesting client. The ACK has already been
/// sent; a failure here means the requester's connection is going away,
/// which its handler will notice on the next read.
pub(crate) fn send_snapshot(shared: &ServerShared, client: &ClientEntry) {
    let (grid, aggregate) = shared.ctx.world();
    if let Err(e) = shared.streamer.stream_to(client, &grid, &aggregate) {
        warn!(pid = client.pid, error = %e, "snapshot stream to requester failed");
    }
}
