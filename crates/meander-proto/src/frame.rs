//! Framed transport over a local stream socket.
//!
//! Every message is an 8-byte header (`type: u16, reserved: u16,
//! payload_len: u32`, little-endian) followed by exactly `payload_len`
//! payload bytes. Reads and writes loop on partial transfers and retry on
//! `Interrupted`.
//!
//! Two send variants exist: [`send_msg`] blocks until the whole frame is
//! written, while [`try_send_msg`] flips the socket into non-blocking mode
//! for the duration of one frame and fails with [`ProtoError::WouldBlock`]
//! when the peer's buffer is full. The non-blocking variant is reserved
//! for small async notifications where a slow consumer must not stall the
//! producer; a would-block is a dropped notification, never a disconnect.
//!
//! `set_nonblocking` acts on the file description shared by all clones of
//! a stream, so a reader blocked on the same socket can observe a
//! transient `WouldBlock` while a notification is being sent. The readers
//! here treat `WouldBlock` as a retry, which makes that window benign.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;

use crate::codec::{decode_payload, encode_payload};
use crate::error::ProtoError;
use crate::msg::Message;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Maximum payload bytes in one SNAPSHOT_CHUNK.
pub const MAX_CHUNK_PAYLOAD: usize = 4096;

/// Upper bound on any declared payload length. The largest catalogued
/// message is a full snapshot chunk (16 + 4096 bytes); anything beyond
/// this is treated as a framing failure.
const MAX_PAYLOAD_LEN: u32 = 8192;

// ── Exact-length primitives ──────────────────────────────────────

/// Read exactly `buf.len()` bytes. Retries `Interrupted` and transient
/// `WouldBlock`; any EOF is terminal.
fn read_full(mut stream: &UnixStream, buf: &mut [u8]) -> Result<(), ProtoError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Err(ProtoError::Disconnected);
                }
                return Err(ProtoError::Io(ErrorKind::UnexpectedEof.into()));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::yield_now(),
            Err(e) => return Err(ProtoError::Io(e)),
        }
    }
    Ok(())
}

/// Write exactly `buf.len()` bytes, retrying `Interrupted` and transient
/// `WouldBlock`.
fn write_full(mut stream: &UnixStream, buf: &[u8]) -> Result<(), ProtoError> {
    let mut sent = 0;
    while sent < buf.len() {
        match stream.write(&buf[sent..]) {
            Ok(0) => return Err(ProtoError::Io(ErrorKind::WriteZero.into())),
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::yield_now(),
            Err(e) => return Err(ProtoError::Io(e)),
        }
    }
    Ok(())
}

/// Write exactly `buf.len()` bytes or fail on the first would-block.
fn write_full_nonblocking(mut stream: &UnixStream, buf: &[u8]) -> Result<(), ProtoError> {
    let mut sent = 0;
    while sent < buf.len() {
        match stream.write(&buf[sent..]) {
            Ok(0) => return Err(ProtoError::Io(ErrorKind::WriteZero.into())),
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(ProtoError::WouldBlock),
            Err(e) => return Err(ProtoError::Io(e)),
        }
    }
    Ok(())
}

// ── Frame encode ─────────────────────────────────────────────────

/// Encode a complete frame: header + payload in one buffer, so each frame
/// goes out in a single `write` path and per-socket write locks keep
/// frames from interleaving.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, ProtoError> {
    let payload = encode_payload(msg)?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&msg.msg_type().wire().to_le_bytes());
    frame.extend_from_slice(&0u16.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

// ── Public send/recv ─────────────────────────────────────────────

/// Send one message, blocking until the whole frame is written.
pub fn send_msg(stream: &UnixStream, msg: &Message) -> Result<(), ProtoError> {
    let frame = encode_frame(msg)?;
    write_full(stream, &frame)
}

/// Best-effort send: fails with [`ProtoError::WouldBlock`] instead of
/// stalling when the peer's socket buffer is full. The blocking flag is
/// restored before returning.
pub fn try_send_msg(stream: &UnixStream, msg: &Message) -> Result<(), ProtoError> {
    let frame = encode_frame(msg)?;
    stream.set_nonblocking(true)?;
    let result = write_full_nonblocking(stream, &frame);
    let restore = stream.set_nonblocking(false);
    result?;
    restore?;
    Ok(())
}

/// Receive one message: exact header read, exact payload read, decode.
///
/// Unknown types and mis-sized payloads are returned as recoverable
/// errors after the payload has been fully drained, so the caller can
/// keep the connection and continue with the next frame (see
/// [`ProtoError::is_connection_fatal`]).
pub fn recv_msg(stream: &UnixStream) -> Result<Message, ProtoError> {
    let mut header = [0u8; HEADER_LEN];
    read_full(stream, &mut header)?;

    let wire_type = u16::from_le_bytes(header[0..2].try_into().unwrap());
    let payload_len = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtoError::OversizedPayload { len: payload_len });
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        read_full(stream, &mut payload)?;
    }

    decode_payload(wire_type, &payload)
}
