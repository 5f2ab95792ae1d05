//! Payload encode/decode.
//!
//! All integers are little-endian; doubles are IEEE-754 64-bit in LE byte
//! order. No alignment padding, no self-describing schema. Paths and error
//! messages occupy a fixed 256-byte NUL-terminated buffer; trailing bytes
//! past the NUL are ignored on decode.

use crate::error::{ErrorCode, ProtoError};
use crate::frame::MAX_CHUNK_PAYLOAD;
use crate::msg::{CreateSim, Message, MsgType, SnapshotBegin, SnapshotChunk, Status, Welcome};
use crate::types::{
    EndReason, GlobalMode, GridSize, MoveProbs, Pos, SimState, WorldKind, PATH_BUF_LEN,
};

// ── Writer ───────────────────────────────────────────────────────

/// Append-only payload writer.
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    fn size(&mut self, s: GridSize) {
        self.u32(s.width);
        self.u32(s.height);
    }

    fn pos(&mut self, p: Pos) {
        self.i32(p.x);
        self.i32(p.y);
    }

    fn probs(&mut self, p: &MoveProbs) {
        self.f64(p.p_up);
        self.f64(p.p_down);
        self.f64(p.p_left);
        self.f64(p.p_right);
    }

    /// Fixed 256-byte NUL-terminated string buffer.
    fn path_buf(&mut self, s: &str) -> Result<(), ProtoError> {
        let raw = s.as_bytes();
        if raw.len() >= PATH_BUF_LEN || raw.contains(&0) {
            return Err(ProtoError::PathTooLong);
        }
        self.buf.extend_from_slice(raw);
        self.buf.resize(self.buf.len() + (PATH_BUF_LEN - raw.len()), 0);
        Ok(())
    }
}

// ── Reader ───────────────────────────────────────────────────────

/// Bounds-checked payload cursor.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtoError> {
        if self.data.len() - self.pos < n {
            return Err(ProtoError::Malformed {
                detail: format!(
                    "truncated payload: wanted {n} bytes at offset {}, have {}",
                    self.pos,
                    self.data.len() - self.pos
                ),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, ProtoError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, ProtoError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, ProtoError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, ProtoError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn size(&mut self) -> Result<GridSize, ProtoError> {
        Ok(GridSize::new(self.u32()?, self.u32()?))
    }

    fn pos_field(&mut self) -> Result<Pos, ProtoError> {
        Ok(Pos::new(self.i32()?, self.i32()?))
    }

    fn probs(&mut self) -> Result<MoveProbs, ProtoError> {
        Ok(MoveProbs {
            p_up: self.f64()?,
            p_down: self.f64()?,
            p_left: self.f64()?,
            p_right: self.f64()?,
        })
    }

    /// Fixed 256-byte buffer; everything up to the first NUL must be UTF-8.
    fn path_buf(&mut self) -> Result<String, ProtoError> {
        let raw = self.take(PATH_BUF_LEN)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8(raw[..end].to_vec()).map_err(|e| ProtoError::Malformed {
            detail: format!("path is not UTF-8: {e}"),
        })
    }

    fn world_kind(&mut self) -> Result<WorldKind, ProtoError> {
        let v = self.u32()?;
        WorldKind::from_wire(v).ok_or(ProtoError::Malformed {
            detail: format!("unknown world kind {v}"),
        })
    }

    fn mode(&mut self) -> Result<GlobalMode, ProtoError> {
        let v = self.u32()?;
        GlobalMode::from_wire(v).ok_or(ProtoError::Malformed {
            detail: format!("unknown global mode {v}"),
        })
    }

    fn sim_state(&mut self) -> Result<SimState, ProtoError> {
        let v = self.u32()?;
        SimState::from_wire(v).ok_or(ProtoError::Malformed {
            detail: format!("unknown sim state {v}"),
        })
    }

    fn bool_u32(&mut self) -> Result<bool, ProtoError> {
        Ok(self.u32()? != 0)
    }

    /// Decoding a fixed-layout message must consume the payload exactly.
    fn finish(self, what: &str) -> Result<(), ProtoError> {
        if self.pos != self.data.len() {
            return Err(ProtoError::Malformed {
                detail: format!(
                    "{what}: payload length {} does not match expected {}",
                    self.data.len(),
                    self.pos
                ),
            });
        }
        Ok(())
    }
}

// ── Encode ───────────────────────────────────────────────────────

/// Encode a message payload. The header is prepended by the framing layer.
pub fn encode_payload(msg: &Message) -> Result<Vec<u8>, ProtoError> {
    let mut w = Writer::with_capacity(64);
    match msg {
        Message::Join { pid } => w.u32(*pid),
        Message::Welcome(m) => {
            w.u32(m.world_kind.wire());
            w.size(m.size);
            w.probs(&m.probs);
            w.u32(m.k_max_steps);
            w.u32(m.total_reps);
            w.u32(m.current_rep);
            w.u32(m.mode.wire());
            w.pos(m.origin);
        }
        Message::SetGlobalMode { mode } => w.u32(mode.wire()),
        Message::GlobalModeChanged {
            mode,
            changed_by_pid,
        } => {
            w.u32(mode.wire());
            w.u32(*changed_by_pid);
        }
        Message::Progress {
            current_rep,
            total_reps,
        } => {
            w.u32(*current_rep);
            w.u32(*total_reps);
        }
        Message::SnapshotBegin(m) => {
            w.u32(m.snapshot_id);
            w.size(m.size);
            w.u32(m.world_kind.wire());
            w.u32(m.cell_count);
            w.u32(m.included_fields);
        }
        Message::SnapshotChunk(m) => {
            if m.data.len() > MAX_CHUNK_PAYLOAD {
                return Err(ProtoError::Malformed {
                    detail: format!("chunk data {} exceeds {MAX_CHUNK_PAYLOAD}", m.data.len()),
                });
            }
            w.u32(m.snapshot_id);
            w.u16(m.field);
            w.u16(0); // reserved
            w.u32(m.offset_bytes);
            w.u32(m.data.len() as u32);
            w.bytes(&m.data);
        }
        Message::SnapshotEnd | Message::StartSim => {}
        Message::StopSim { pid }
        | Message::QueryStatus { pid }
        | Message::RequestSnapshot { pid } => w.u32(*pid),
        Message::End { reason } => w.u32(reason.wire()),
        Message::Status(m) => {
            w.u32(m.sim_state.wire());
            w.u32(m.world_kind.wire());
            w.size(m.size);
            w.probs(&m.probs);
            w.u32(m.k_max_steps);
            w.u32(m.total_reps);
            w.u32(m.current_rep);
            w.u32(m.mode.wire());
            w.u32(m.multi_user as u32);
            w.u32(m.client_count);
            w.u32(m.owner_pid);
        }
        Message::CreateSim(m) => {
            w.u32(m.world_kind.wire());
            w.size(m.size);
            w.probs(&m.probs);
            w.u32(m.k_max_steps);
            w.u32(m.total_reps);
            w.u32(m.multi_user as u32);
            w.u32(m.obstacle_percent);
            w.u32(m.obstacle_seed);
        }
        Message::LoadWorld { path, multi_user } => {
            w.path_buf(path)?;
            w.u32(*multi_user as u32);
        }
        Message::RestartSim { total_reps } => w.u32(*total_reps),
        Message::LoadResults { path } | Message::SaveResults { path } => w.path_buf(path)?,
        Message::Quit {
            pid,
            stop_if_owner,
        } => {
            w.u32(*pid);
            w.u32(*stop_if_owner as u32);
        }
        Message::Ack {
            request_type,
            status,
        } => {
            w.u16(request_type.wire());
            w.u16(*status);
        }
        Message::Error { code, message } => {
            w.u32(code.wire());
            w.path_buf(message)?;
        }
    }
    Ok(w.buf)
}

// ── Decode ───────────────────────────────────────────────────────

/// Decode a payload for a known wire type. The caller has already read the
/// full payload, so a decode failure never desynchronizes the stream.
pub fn decode_payload(wire_type: u16, payload: &[u8]) -> Result<Message, ProtoError> {
    let msg_type =
        MsgType::from_wire(wire_type).ok_or(ProtoError::UnknownType { code: wire_type })?;
    let mut r = Reader::new(payload);
    let msg = match msg_type {
        MsgType::Join => Message::Join { pid: r.u32()? },
        MsgType::Welcome => Message::Welcome(Welcome {
            world_kind: r.world_kind()?,
            size: r.size()?,
            probs: r.probs()?,
            k_max_steps: r.u32()?,
            total_reps: r.u32()?,
            current_rep: r.u32()?,
            mode: r.mode()?,
            origin: r.pos_field()?,
        }),
        MsgType::SetGlobalMode => Message::SetGlobalMode { mode: r.mode()? },
        MsgType::GlobalModeChanged => Message::GlobalModeChanged {
            mode: r.mode()?,
            changed_by_pid: r.u32()?,
        },
        MsgType::Progress => Message::Progress {
            current_rep: r.u32()?,
            total_reps: r.u32()?,
        },
        MsgType::SnapshotBegin => Message::SnapshotBegin(SnapshotBegin {
            snapshot_id: r.u32()?,
            size: r.size()?,
            world_kind: r.world_kind()?,
            cell_count: r.u32()?,
            included_fields: r.u32()?,
        }),
        MsgType::SnapshotChunk => {
            let snapshot_id = r.u32()?;
            let field = r.u16()?;
            let _reserved = r.u16()?;
            let offset_bytes = r.u32()?;
            let data_len = r.u32()? as usize;
            if data_len > MAX_CHUNK_PAYLOAD {
                return Err(ProtoError::Malformed {
                    detail: format!("chunk data_len {data_len} exceeds {MAX_CHUNK_PAYLOAD}"),
                });
            }
            let data = r.take(data_len)?.to_vec();
            Message::SnapshotChunk(SnapshotChunk {
                snapshot_id,
                field,
                offset_bytes,
                data,
            })
        }
        MsgType::SnapshotEnd => Message::SnapshotEnd,
        MsgType::StopSim => Message::StopSim { pid: r.u32()? },
        MsgType::End => {
            let v = r.u32()?;
            let reason = EndReason::from_wire(v).ok_or(ProtoError::Malformed {
                detail: format!("unknown end reason {v}"),
            })?;
            Message::End { reason }
        }
        MsgType::QueryStatus => Message::QueryStatus { pid: r.u32()? },
        MsgType::Status => Message::Status(Status {
            sim_state: r.sim_state()?,
            world_kind: r.world_kind()?,
            size: r.size()?,
            probs: r.probs()?,
            k_max_steps: r.u32()?,
            total_reps: r.u32()?,
            current_rep: r.u32()?,
            mode: r.mode()?,
            multi_user: r.bool_u32()?,
            client_count: r.u32()?,
            owner_pid: r.u32()?,
        }),
        MsgType::CreateSim => Message::CreateSim(CreateSim {
            world_kind: r.world_kind()?,
            size: r.size()?,
            probs: r.probs()?,
            k_max_steps: r.u32()?,
            total_reps: r.u32()?,
            multi_user: r.bool_u32()?,
            obstacle_percent: r.u32()?,
            obstacle_seed: r.u32()?,
        }),
        MsgType::LoadWorld => Message::LoadWorld {
            path: r.path_buf()?,
            multi_user: r.bool_u32()?,
        },
        MsgType::StartSim => Message::StartSim,
        MsgType::RequestSnapshot => Message::RequestSnapshot { pid: r.u32()? },
        MsgType::RestartSim => Message::RestartSim { total_reps: r.u32()? },
        MsgType::LoadResults => Message::LoadResults { path: r.path_buf()? },
        MsgType::SaveResults => Message::SaveResults { path: r.path_buf()? },
        MsgType::Quit => Message::Quit {
            pid: r.u32()?,
            stop_if_owner: r.bool_u32()?,
        },
        MsgType::Ack => {
            let raw = r.u16()?;
            let request_type = MsgType::from_wire(raw).ok_or(ProtoError::Malformed {
                detail: format!("ack references unknown request type {raw}"),
            })?;
            Message::Ack {
                request_type,
                status: r.u16()?,
            }
        }
        MsgType::Error => {
            let raw = r.u32()?;
            let code = ErrorCode::from_wire(raw).ok_or(ProtoError::Malformed {
                detail: format!("unknown error code {raw}"),
            })?;
            Message::Error {
                code,
                message: r.path_buf()?,
            }
        }
    };
    r.finish("message payload")?;
    Ok(msg)
}
