//! The message catalogue.
//!
//! Type codes and payload shapes are part of the stable wire contract:
//!
//! | Code | Name | Direction |
//! |------|------|-----------|
//! | 1    | JOIN | C→S |
//! | 2    | WELCOME | S→C |
//! | 3    | SET_GLOBAL_MODE | C→S |
//! | 4    | GLOBAL_MODE_CHANGED | S→all |
//! | 5    | PROGRESS | S→all |
//! | 6–8  | SNAPSHOT_BEGIN / CHUNK / END | S→C |
//! | 9    | STOP_SIM | C→S |
//! | 10   | END | S→all |
//! | 11/12| QUERY_STATUS / STATUS | C⇆S |
//! | 13   | CREATE_SIM | C→S |
//! | 14   | LOAD_WORLD | C→S |
//! | 15   | START_SIM | C→S |
//! | 16   | REQUEST_SNAPSHOT | C→S |
//! | 17   | RESTART_SIM | C→S |
//! | 18   | LOAD_RESULTS | C→S |
//! | 19   | SAVE_RESULTS | C→S |
//! | 20   | QUIT | C→S |
//! | 21   | ACK | S→C |
//! | 255  | ERROR | S→C |

use crate::error::ErrorCode;
use crate::types::{EndReason, GlobalMode, GridSize, MoveProbs, Pos, SimState, WorldKind};

// ── MsgType ──────────────────────────────────────────────────────

/// Wire message type. The explicit table below is the single source of
/// truth for type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum MsgType {
    Join,
    Welcome,
    SetGlobalMode,
    GlobalModeChanged,
    Progress,
    SnapshotBegin,
    SnapshotChunk,
    SnapshotEnd,
    StopSim,
    End,
    QueryStatus,
    Status,
    CreateSim,
    LoadWorld,
    StartSim,
    RequestSnapshot,
    RestartSim,
    LoadResults,
    SaveResults,
    Quit,
    Ack,
    Error,
}

impl MsgType {
    /// Wire encoding.
    pub const fn wire(self) -> u16 {
        match self {
            Self::Join => 1,
            Self::Welcome => 2,
            Self::SetGlobalMode => 3,
            Self::GlobalModeChanged => 4,
            Self::Progress => 5,
            Self::SnapshotBegin => 6,
            Self::SnapshotChunk => 7,
            Self::SnapshotEnd => 8,
            Self::StopSim => 9,
            Self::End => 10,
            Self::QueryStatus => 11,
            Self::Status => 12,
            Self::CreateSim => 13,
            Self::LoadWorld => 14,
            Self::StartSim => 15,
            Self::RequestSnapshot => 16,
            Self::RestartSim => 17,
            Self::LoadResults => 18,
            Self::SaveResults => 19,
            Self::Quit => 20,
            Self::Ack => 21,
            Self::Error => 255,
        }
    }

    /// Decode from the wire value.
    pub const fn from_wire(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::Join),
            2 => Some(Self::Welcome),
            3 => Some(Self::SetGlobalMode),
            4 => Some(Self::GlobalModeChanged),
            5 => Some(Self::Progress),
            6 => Some(Self::SnapshotBegin),
            7 => Some(Self::SnapshotChunk),
            8 => Some(Self::SnapshotEnd),
            9 => Some(Self::StopSim),
            10 => Some(Self::End),
            11 => Some(Self::QueryStatus),
            12 => Some(Self::Status),
            13 => Some(Self::CreateSim),
            14 => Some(Self::LoadWorld),
            15 => Some(Self::StartSim),
            16 => Some(Self::RequestSnapshot),
            17 => Some(Self::RestartSim),
            18 => Some(Self::LoadResults),
            19 => Some(Self::SaveResults),
            20 => Some(Self::Quit),
            21 => Some(Self::Ack),
            255 => Some(Self::Error),
            _ => None,
        }
    }
}

// ── Composite payloads ───────────────────────────────────────────

/// WELCOME payload: the server's current configuration and mode, sent
/// once per connection right after a valid JOIN.
#[derive(Clone, Debug, PartialEq)]
pub struct Welcome {
    /// Configured world kind.
    pub world_kind: WorldKind,
    /// Configured dimensions.
    pub size: GridSize,
    /// Configured move distribution.
    pub probs: MoveProbs,
    /// Step cap per trajectory.
    pub k_max_steps: u32,
    /// Configured replications per batch.
    pub total_reps: u32,
    /// Replications completed so far.
    pub current_rep: u32,
    /// Current global display mode.
    pub mode: GlobalMode,
    /// The walk target; always `(0, 0)`.
    pub origin: Pos,
}

/// STATUS payload: the full observable server state.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    /// Control-plane state.
    pub sim_state: SimState,
    /// Configured world kind.
    pub world_kind: WorldKind,
    /// Configured dimensions.
    pub size: GridSize,
    /// Configured move distribution.
    pub probs: MoveProbs,
    /// Step cap per trajectory.
    pub k_max_steps: u32,
    /// Configured replications per batch.
    pub total_reps: u32,
    /// Replications completed so far.
    pub current_rep: u32,
    /// Current global display mode.
    pub mode: GlobalMode,
    /// Informational multi-user flag; control is still gated by ownership.
    pub multi_user: bool,
    /// Connected client count.
    pub client_count: u32,
    /// PID of the owning client, 0 when ownership is unset.
    pub owner_pid: u32,
}

/// CREATE_SIM payload: full reconfiguration of the world and batch.
///
/// `obstacle_percent` / `obstacle_seed` drive the deterministic obstacle
/// generator and are ignored for WRAP worlds.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateSim {
    /// Requested world kind.
    pub world_kind: WorldKind,
    /// Requested dimensions.
    pub size: GridSize,
    /// Requested move distribution.
    pub probs: MoveProbs,
    /// Step cap per trajectory.
    pub k_max_steps: u32,
    /// Replications per batch.
    pub total_reps: u32,
    /// Informational multi-user flag.
    pub multi_user: bool,
    /// Target obstacle density in percent, clamped to `[0, 100]`.
    pub obstacle_percent: u32,
    /// Seed for the deterministic obstacle generator.
    pub obstacle_seed: u32,
}

/// SNAPSHOT_BEGIN payload: announces one chunked snapshot stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotBegin {
    /// Monotonically increasing snapshot identifier.
    pub snapshot_id: u32,
    /// World dimensions at snapshot time.
    pub size: GridSize,
    /// World kind at snapshot time.
    pub world_kind: WorldKind,
    /// `size.width * size.height`.
    pub cell_count: u32,
    /// Bitmask of [`crate::types::SnapshotField`] bits present in the stream.
    pub included_fields: u32,
}

/// SNAPSHOT_CHUNK payload: one consecutive byte range of one field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotChunk {
    /// Snapshot this chunk belongs to; stale ids are ignored by receivers.
    pub snapshot_id: u32,
    /// Field wire code (see [`crate::types::SnapshotField`]). Carried raw
    /// so that receivers can skip unknown fields without losing framing.
    pub field: u16,
    /// Byte offset of this chunk inside the field's array.
    pub offset_bytes: u32,
    /// Chunk bytes, at most [`crate::frame::MAX_CHUNK_PAYLOAD`].
    pub data: Vec<u8>,
}

// ── Message ──────────────────────────────────────────────────────

/// One decoded protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Client joins, identifying itself by PID.
    Join {
        /// Client process id.
        pid: u32,
    },
    /// Server greeting with current configuration.
    Welcome(Welcome),
    /// Client requests a global mode change (no direct reply; a
    /// GLOBAL_MODE_CHANGED broadcast follows).
    SetGlobalMode {
        /// Requested mode.
        mode: GlobalMode,
    },
    /// Broadcast: the global mode changed.
    GlobalModeChanged {
        /// New mode.
        mode: GlobalMode,
        /// PID of the client that requested the change.
        changed_by_pid: u32,
    },
    /// Broadcast: replication progress.
    Progress {
        /// Replications completed.
        current_rep: u32,
        /// Replications configured.
        total_reps: u32,
    },
    /// Snapshot stream start.
    SnapshotBegin(SnapshotBegin),
    /// Snapshot stream data.
    SnapshotChunk(SnapshotChunk),
    /// Snapshot stream end (empty payload).
    SnapshotEnd,
    /// Client requests a cooperative stop.
    StopSim {
        /// Requesting client PID.
        pid: u32,
    },
    /// Broadcast: the batch ended.
    End {
        /// Why the batch ended.
        reason: EndReason,
    },
    /// Client asks for the full status block.
    QueryStatus {
        /// Requesting client PID.
        pid: u32,
    },
    /// Server status reply.
    Status(Status),
    /// Client reconfigures the simulation.
    CreateSim(CreateSim),
    /// Client asks the server to load a world file.
    LoadWorld {
        /// Path on the server host.
        path: String,
        /// Informational multi-user flag.
        multi_user: bool,
    },
    /// Client starts the configured batch (empty payload).
    StartSim,
    /// Client requests a snapshot stream.
    RequestSnapshot {
        /// Requesting client PID.
        pid: u32,
    },
    /// Client restarts with a new replication count.
    RestartSim {
        /// New replication count.
        total_reps: u32,
    },
    /// Client asks the server to load a results file.
    LoadResults {
        /// Path on the server host.
        path: String,
    },
    /// Client asks the server to save results.
    SaveResults {
        /// Path on the server host.
        path: String,
    },
    /// Client leaves.
    Quit {
        /// Leaving client PID.
        pid: u32,
        /// When the leaving client owns the session, also request a
        /// cooperative stop of any running batch.
        stop_if_owner: bool,
    },
    /// Positive terminal reply to a control request.
    Ack {
        /// The request type being acknowledged.
        request_type: MsgType,
        /// Status code; 0 means OK.
        status: u16,
    },
    /// Negative terminal reply to a control request.
    Error {
        /// Taxonomy code.
        code: ErrorCode,
        /// Advisory message, NUL-terminated on the wire within 256 bytes.
        message: String,
    },
}

impl Message {
    /// The wire type of this message.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Join { .. } => MsgType::Join,
            Self::Welcome(_) => MsgType::Welcome,
            Self::SetGlobalMode { .. } => MsgType::SetGlobalMode,
            Self::GlobalModeChanged { .. } => MsgType::GlobalModeChanged,
            Self::Progress { .. } => MsgType::Progress,
            Self::SnapshotBegin(_) => MsgType::SnapshotBegin,
            Self::SnapshotChunk(_) => MsgType::SnapshotChunk,
            Self::SnapshotEnd => MsgType::SnapshotEnd,
            Self::StopSim { .. } => MsgType::StopSim,
            Self::End { .. } => MsgType::End,
            Self::QueryStatus { .. } => MsgType::QueryStatus,
            Self::Status(_) => MsgType::Status,
            Self::CreateSim(_) => MsgType::CreateSim,
            Self::LoadWorld { .. } => MsgType::LoadWorld,
            Self::StartSim => MsgType::StartSim,
            Self::RequestSnapshot { .. } => MsgType::RequestSnapshot,
            Self::RestartSim { .. } => MsgType::RestartSim,
            Self::LoadResults { .. } => MsgType::LoadResults,
            Self::SaveResults { .. } => MsgType::SaveResults,
            Self::Quit { .. } => MsgType::Quit,
            Self::Ack { .. } => MsgType::Ack,
            Self::Error { .. } => MsgType::Error,
        }
    }
}
