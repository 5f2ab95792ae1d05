//! The Meander server: control-plane state machine, framed IPC loop,
//! snapshot streaming, and persistence.
//!
//! One accept thread hands each connection to a tracked handler thread.
//! Handlers validate a JOIN handshake, then dispatch control requests
//! against the [`context::ServerContext`] state machine, replying exactly
//! once (ACK or ERROR) per request. A notifier thread drains the
//! simulation manager's event channel into best-effort broadcasts so a
//! slow client can never stall the replication loop.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod context;
pub mod error;
mod ipc;
mod ops;
pub mod persist;
pub mod server;
pub mod snapshot;

pub use context::{ClientEntry, ClientId, ServerContext, SimConfig, MAX_CLIENTS};
pub use error::ServerError;
pub use server::{Server, ServerConfig};
pub use snapshot::SnapshotStreamer;
