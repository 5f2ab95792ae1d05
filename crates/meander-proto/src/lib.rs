//! Wire protocol for the Meander random-walk simulation framework.
//!
//! This is the leaf crate with no internal dependencies. It defines the
//! domain enums shared between client and server, the complete message
//! catalogue, the framed codec (8-byte header + payload), and the numeric
//! error taxonomy carried in ERROR replies.
//!
//! The transport is a local `SOCK_STREAM` socket; every message is an
//! 8-byte little-endian header (`type: u16, reserved: u16, payload_len:
//! u32`) followed by exactly `payload_len` payload bytes. Payloads use
//! explicit fixed-width integers; wire enums are mapped to domain sum
//! types through explicit tables, never through native enum layout.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod msg;
pub mod types;

pub use error::{ErrorCode, ProtoError};
pub use frame::{recv_msg, send_msg, try_send_msg, HEADER_LEN, MAX_CHUNK_PAYLOAD};
pub use msg::{CreateSim, Message, MsgType, SnapshotBegin, SnapshotChunk, Status, Welcome};
pub use types::{
    EndReason, GlobalMode, GridSize, MoveProbs, Pos, SimState, SnapshotField, WorldKind,
    PATH_BUF_LEN, PROB_SUM_MAX, PROB_SUM_MIN,
};
