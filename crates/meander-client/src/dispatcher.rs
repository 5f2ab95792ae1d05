//! The single-reader socket dispatcher.
//!
//! Exactly one thread may read the client socket; this module owns that
//! thread. The reader decodes each incoming frame and routes it:
//!
//! - PROGRESS, END, GLOBAL_MODE_CHANGED are consumed silently (they must
//!   never interleave with the interactive prompt),
//! - the snapshot stream feeds the [`SnapshotAssembler`],
//! - a message whose type is in the in-flight request's expected set is
//!   latched into the single response slot,
//! - everything else is dropped.
//!
//! [`Dispatcher::send_and_wait`] serializes callers: at most one
//! synchronous request is in flight, and responses are matched by type
//! only, so callers pass a tight expected set (typically `{ACK, ERROR}`).
//! The request is sent while holding the state lock to preserve ordering
//! — safe because sends are short and the reader never holds the lock
//! while blocked on the socket.

use std::os::unix::net::UnixStream;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use meander_proto::{frame, Message, MsgType, ProtoError};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::assembler::{SnapshotAssembler, SnapshotData};
use crate::error::ClientError;

struct DispatchState {
    waiting: bool,
    expected: SmallVec<[MsgType; 3]>,
    slot: Option<Message>,
    stop: bool,
}

struct SnapshotSlot {
    assembler: SnapshotAssembler,
    latest: Option<SnapshotData>,
    closed: bool,
}

struct Shared {
    writer: UnixStream,
    state: Mutex<DispatchState>,
    cond: Condvar,
    snapshots: Mutex<SnapshotSlot>,
    snapshot_cond: Condvar,
}

/// Owns the reader thread and the write half of the control socket.
pub struct Dispatcher {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Take ownership of a connected socket and start the reader thread.
    pub fn start(stream: UnixStream) -> Result<Self, ClientError> {
        let read_half = stream.try_clone()?;
        let shared = Arc::new(Shared {
            writer: stream,
            state: Mutex::new(DispatchState {
                waiting: false,
                expected: SmallVec::new(),
                slot: None,
                stop: false,
            }),
            cond: Condvar::new(),
            snapshots: Mutex::new(SnapshotSlot {
                assembler: SnapshotAssembler::new(),
                latest: None,
                closed: false,
            }),
            snapshot_cond: Condvar::new(),
        });

        let reader_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("meander-reader".into())
            .spawn(move || reader_loop(&read_half, &reader_shared))
            .expect("failed to spawn reader thread");

        Ok(Self {
            shared,
            reader: Some(reader),
        })
    }

    /// Send a request and wait for a reply whose type is in `expected`.
    ///
    /// Callers are serialized: a second call blocks until the first
    /// completes. `timeout` of `None` waits forever; a timeout abandons
    /// only the local wait, never the server-side work.
    pub fn send_and_wait(
        &self,
        request: &Message,
        expected: &[MsgType],
        timeout: Option<Duration>,
    ) -> Result<Message, ClientError> {
        debug_assert!(!expected.is_empty() && expected.len() <= 3);

        let mut state = self.shared.state.lock().unwrap();
        while state.waiting && !state.stop {
            state = self.shared.cond.wait(state).unwrap();
        }
        if state.stop {
            return Err(ClientError::Disconnected);
        }
        state.waiting = true;
        state.expected = SmallVec::from_slice(expected);
        state.slot = None;

        if let Err(e) = frame::send_msg(&self.shared.writer, request) {
            state.waiting = false;
            state.expected.clear();
            self.shared.cond.notify_all();
            return Err(e.into());
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let result = loop {
            if let Some(reply) = state.slot.take() {
                break Ok(reply);
            }
            if state.stop {
                break Err(ClientError::Disconnected);
            }
            match deadline {
                None => state = self.shared.cond.wait(state).unwrap(),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        break Err(ClientError::Timeout);
                    }
                    let (guard, _) = self
                        .shared
                        .cond
                        .wait_timeout(state, d - now)
                        .unwrap();
                    state = guard;
                }
            }
        };

        state.waiting = false;
        state.expected.clear();
        state.slot = None;
        self.shared.cond.notify_all();
        result
    }

    /// Send a message that has no synchronous reply (SET_GLOBAL_MODE).
    /// Serialized against `send_and_wait` so frames never interleave.
    pub fn send(&self, msg: &Message) -> Result<(), ClientError> {
        let _state = self.shared.state.lock().unwrap();
        frame::send_msg(&self.shared.writer, msg).map_err(Into::into)
    }

    /// Wait for the next fully assembled snapshot.
    pub fn wait_for_snapshot(&self, timeout: Duration) -> Result<SnapshotData, ClientError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.snapshots.lock().unwrap();
        loop {
            if let Some(data) = slot.latest.take() {
                return Ok(data);
            }
            if slot.closed {
                return Err(ClientError::Disconnected);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout);
            }
            let (guard, _) = self
                .shared
                .snapshot_cond
                .wait_timeout(slot, deadline - now)
                .unwrap();
            slot = guard;
        }
    }

    /// Stop the reader and close the socket.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stop = true;
            self.shared.cond.notify_all();
        }
        let _ = self.shared.writer.shutdown(std::net::Shutdown::Both);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Reader thread ────────────────────────────────────────────────

fn reader_loop(read_half: &UnixStream, shared: &Arc<Shared>) {
    loop {
        if shared.state.lock().unwrap().stop {
            break;
        }
        match frame::recv_msg(read_half) {
            Ok(msg) => route(shared, msg),
            Err(e) if !e.is_connection_fatal() => {
                warn!(error = %e, "dropping undecodable message");
            }
            Err(e) => {
                if !matches!(e, ProtoError::Disconnected) {
                    debug!(error = %e, "reader stopping");
                }
                {
                    let mut state = shared.state.lock().unwrap();
                    state.stop = true;
                    shared.cond.notify_all();
                }
                {
                    let mut slot = shared.snapshots.lock().unwrap();
                    slot.closed = true;
                    shared.snapshot_cond.notify_all();
                }
                break;
            }
        }
    }
}

fn route(shared: &Arc<Shared>, msg: Message) {
    match msg {
        // Async notifications: consumed so the socket drains, never shown.
        Message::Progress {
            current_rep,
            total_reps,
        } => trace!(current_rep, total_reps, "progress"),
        Message::End { reason } => trace!(?reason, "batch ended"),
        Message::GlobalModeChanged { mode, .. } => trace!(?mode, "global mode changed"),

        // Snapshot stream.
        Message::SnapshotBegin(begin) => {
            let mut slot = shared.snapshots.lock().unwrap();
            if let Err(e) = slot.assembler.begin(begin) {
                warn!(error = %e, "snapshot begin rejected");
            }
        }
        Message::SnapshotChunk(chunk) => {
            let mut slot = shared.snapshots.lock().unwrap();
            if let Err(e) = slot.assembler.chunk(&chunk) {
                warn!(error = %e, "snapshot chunk rejected");
            }
        }
        Message::SnapshotEnd => {
            let mut slot = shared.snapshots.lock().unwrap();
            if let Some(data) = slot.assembler.end() {
                slot.latest = Some(data);
                shared.snapshot_cond.notify_all();
            }
        }

        // Candidate synchronous response.
        other => {
            let mut state = shared.state.lock().unwrap();
            let msg_type = other.msg_type();
            if state.waiting && state.slot.is_none() && state.expected.contains(&msg_type) {
                state.slot = Some(other);
                shared.cond.notify_all();
            } else {
                debug!(?msg_type, "dropping unexpected message");
            }
        }
    }
}
