//! Accept loop and per-connection request dispatch.
//!
//! The accept thread polls a non-blocking listener so the shutdown flag
//! can be observed, and spawns one tracked handler thread per connection.
//! A handler expects JOIN first (anything else closes the connection),
//! replies WELCOME, then serves requests strictly sequentially: the
//! terminal ACK/ERROR for a request is written before the next header is
//! read. Unknown or malformed messages are drained by the framing layer
//! and the connection continues; transport errors remove the client.

use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use meander_proto::{frame, Message, MsgType, ProtoError};
use tracing::{debug, info, warn};

use crate::context::ClientEntry;
use crate::ops;
use crate::server::ServerShared;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Longest advisory message we put in an ERROR payload; the wire buffer
/// holds 255 bytes plus the NUL.
const MAX_ERROR_MESSAGE: usize = 200;

pub(crate) fn accept_loop(listener: UnixListener, shared: Arc<ServerShared>) {
    if let Err(e) = listener.set_nonblocking(true) {
        warn!(error = %e, "accept loop cannot poll, exiting");
        return;
    }
    let mut connection_seq = 0u64;
    while !shared.shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                connection_seq += 1;
                let thread_shared = Arc::clone(&shared);
                let handle = thread::Builder::new()
                    .name(format!("meander-client-{connection_seq}"))
                    .spawn(move || {
                        if let Err(e) = stream.set_nonblocking(false) {
                            warn!(error = %e, "could not configure client socket");
                            return;
                        }
                        handle_connection(stream, &thread_shared);
                    })
                    .expect("failed to spawn client handler");

                let mut handlers = shared.handlers.lock().unwrap();
                handlers.retain(|h| !h.is_finished());
                handlers.push(handle);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "accept failed, stopping accept loop");
                break;
            }
        }
    }
    debug!("accept loop exited");
}

fn handle_connection(stream: UnixStream, shared: &Arc<ServerShared>) {
    // JOIN-first handshake; any deviation closes the connection.
    let pid = match frame::recv_msg(&stream) {
        Ok(Message::Join { pid }) => pid,
        Ok(other) => {
            warn!(got = ?other.msg_type(), "expected JOIN, closing");
            return;
        }
        Err(e) => {
            debug!(error = %e, "connection dropped before JOIN");
            return;
        }
    };

    let writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "could not clone client socket");
            return;
        }
    };

    // WELCOME must be the first frame the client sees. It goes out
    // before registration, while no broadcast can reach this socket.
    if frame::send_msg(&stream, &Message::Welcome(shared.ctx.welcome())).is_err() {
        return;
    }
    let Some(entry) = shared.ctx.add_client(pid, writer) else {
        warn!(pid, "registry full, refusing client");
        return;
    };
    info!(pid, id = entry.id, "client joined");

    loop {
        match frame::recv_msg(&stream) {
            Ok(msg) => {
                if !dispatch(shared, &entry, msg) {
                    break;
                }
            }
            Err(e) if !e.is_connection_fatal() => {
                // Payload already drained; framing is intact.
                warn!(pid, error = %e, "ignoring unparseable message");
            }
            Err(ProtoError::Disconnected) => break,
            Err(e) => {
                warn!(pid, error = %e, "client read failed");
                break;
            }
        }
    }

    shared.ctx.remove_client(entry.id);
    info!(pid, id = entry.id, "client disconnected");
}

/// Handle one request. Returns false when the connection should close.
fn dispatch(shared: &Arc<ServerShared>, entry: &Arc<ClientEntry>, msg: Message) -> bool {
    let req_type = msg.msg_type();
    match msg {
        // Open to any client.
        Message::QueryStatus { .. } => {
            let status = shared.ctx.status();
            entry.send(&Message::Status(status)).is_ok()
        }
        Message::RequestSnapshot { .. } => {
            if !send_reply(entry, req_type, Ok(())) {
                return false;
            }
            ops::send_snapshot(shared, entry);
            true
        }
        Message::SetGlobalMode { mode } => {
            // No direct reply; the broadcast confirms the change.
            ops::set_global_mode(shared, entry, mode);
            true
        }

        // Owner-gated control plane.
        Message::CreateSim(req) => send_reply(entry, req_type, ops::create_sim(shared, entry, &req)),
        Message::StartSim => send_reply(entry, req_type, ops::start_sim(shared, entry)),
        Message::RestartSim { total_reps } => {
            send_reply(entry, req_type, ops::restart_sim(shared, entry, total_reps))
        }
        Message::StopSim { .. } => send_reply(entry, req_type, ops::stop_sim(shared, entry)),
        Message::LoadWorld { path, multi_user } => send_reply(
            entry,
            req_type,
            ops::load_world(shared, entry, &path, multi_user),
        ),
        Message::LoadResults { path } => {
            send_reply(entry, req_type, ops::load_results(shared, entry, &path))
        }
        Message::SaveResults { path } => {
            send_reply(entry, req_type, ops::save_results(shared, entry, &path))
        }

        Message::Quit { stop_if_owner, .. } => {
            let owner_leaving = shared.ctx.is_owner(entry.id);
            let _ = send_reply(entry, req_type, Ok(()));
            if stop_if_owner && owner_leaving {
                shared.manager.request_stop();
                info!(pid = entry.pid, "owner quit with stop request");
            }
            false
        }

        // A second JOIN is a protocol violation.
        Message::Join { .. } => {
            warn!(pid = entry.pid, "duplicate JOIN, closing");
            false
        }

        // Server-to-client message types arriving from a client are
        // dropped; the frame was already consumed.
        other => {
            debug!(pid = entry.pid, got = ?other.msg_type(), "dropping unexpected message");
            true
        }
    }
}

/// Send exactly one terminal reply for a request. Returns false when the
/// reply could not be written (the connection is dying).
fn send_reply(entry: &ClientEntry, req_type: MsgType, result: ops::OpResult) -> bool {
    let reply = match result {
        Ok(()) => Message::Ack {
            request_type: req_type,
            status: 0,
        },
        Err((code, mut message)) => {
            if message.len() > MAX_ERROR_MESSAGE {
                let mut cut = MAX_ERROR_MESSAGE;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            debug!(request = ?req_type, code = ?code, "request rejected");
            Message::Error { code, message }
        }
    };
    entry.send(&reply).is_ok()
}
