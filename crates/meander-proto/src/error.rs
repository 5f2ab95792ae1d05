//! Protocol error types and the numeric taxonomy carried in ERROR replies.

use std::error::Error;
use std::fmt;
use std::io;

// ── ProtoError ───────────────────────────────────────────────────

/// Errors from the framed codec and transport helpers.
#[derive(Debug)]
pub enum ProtoError {
    /// Underlying socket error.
    Io(io::Error),
    /// The peer closed the stream at a frame boundary.
    Disconnected,
    /// A best-effort send would have blocked; the frame was dropped.
    WouldBlock,
    /// Header carried a type code outside the catalogue. The payload has
    /// been consumed, so framing is preserved and the stream is usable.
    UnknownType {
        /// The unrecognized wire type code.
        code: u16,
    },
    /// A known message arrived with a malformed or mis-sized payload.
    /// The payload has been consumed; the stream is usable.
    Malformed {
        /// Human-readable description of the defect.
        detail: String,
    },
    /// Header declared a payload larger than any catalogued message.
    /// Framing cannot be trusted past this point.
    OversizedPayload {
        /// Declared payload length.
        len: u32,
    },
    /// A path (or error message) does not fit its fixed 256-byte buffer.
    PathTooLong,
}

impl ProtoError {
    /// Whether the connection must be torn down. Unknown and malformed
    /// messages leave the stream aligned and are recoverable; transport
    /// errors and untrustworthy lengths are not.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Disconnected | Self::OversizedPayload { .. }
        )
    }
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "socket error: {e}"),
            Self::Disconnected => write!(f, "peer disconnected"),
            Self::WouldBlock => write!(f, "send would block"),
            Self::UnknownType { code } => write!(f, "unknown message type {code}"),
            Self::Malformed { detail } => write!(f, "malformed message: {detail}"),
            Self::OversizedPayload { len } => {
                write!(f, "declared payload length {len} exceeds protocol maximum")
            }
            Self::PathTooLong => write!(f, "path exceeds the 256-byte wire buffer"),
        }
    }
}

impl Error for ProtoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtoError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// ── ErrorCode ────────────────────────────────────────────────────

/// Numeric error taxonomy carried in ERROR payloads. Each code has a
/// distinct meaning; the message string is advisory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// A non-owner attempted a control operation.
    PermissionDenied,
    /// The request conflicts with the current simulation state.
    StateConflict,
    /// Zero dimensions, zero replications, or zero step cap.
    InvalidParams,
    /// Move probabilities sum outside `[0.999, 1.001]`.
    BadProbabilitySum,
    /// World (re)initialization failed.
    WorldInitFailed,
    /// Aggregate (re)initialization failed.
    AggregateInitFailed,
    /// Server handles not wired.
    HandlesNotWired,
    /// Loading a world file failed.
    LoadWorldFailed,
    /// Simulation manager not wired.
    ManagerNotWired,
    /// Starting or restarting the batch failed.
    StartFailed,
    /// No snapshot source is available.
    SnapshotUnavailable,
    /// Streaming a snapshot to the requester failed.
    SnapshotSendFailed,
    /// No completed results exist to save.
    NothingToSave,
    /// Writing the results file failed.
    SaveFailed,
    /// Reading the results file failed.
    LoadFailed,
}

impl ErrorCode {
    /// Wire encoding.
    pub const fn wire(self) -> u32 {
        match self {
            Self::PermissionDenied => 1,
            Self::StateConflict => 2,
            Self::InvalidParams => 3,
            Self::BadProbabilitySum => 4,
            Self::WorldInitFailed => 5,
            Self::AggregateInitFailed => 6,
            Self::HandlesNotWired => 7,
            Self::LoadWorldFailed => 8,
            Self::ManagerNotWired => 9,
            Self::StartFailed => 10,
            Self::SnapshotUnavailable => 11,
            Self::SnapshotSendFailed => 12,
            Self::NothingToSave => 13,
            Self::SaveFailed => 14,
            Self::LoadFailed => 15,
        }
    }

    /// Decode from the wire value.
    pub const fn from_wire(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::PermissionDenied),
            2 => Some(Self::StateConflict),
            3 => Some(Self::InvalidParams),
            4 => Some(Self::BadProbabilitySum),
            5 => Some(Self::WorldInitFailed),
            6 => Some(Self::AggregateInitFailed),
            7 => Some(Self::HandlesNotWired),
            8 => Some(Self::LoadWorldFailed),
            9 => Some(Self::ManagerNotWired),
            10 => Some(Self::StartFailed),
            11 => Some(Self::SnapshotUnavailable),
            12 => Some(Self::SnapshotSendFailed),
            13 => Some(Self::NothingToSave),
            14 => Some(Self::SaveFailed),
            15 => Some(Self::LoadFailed),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PermissionDenied => "permission denied",
            Self::StateConflict => "state conflict",
            Self::InvalidParams => "invalid parameters",
            Self::BadProbabilitySum => "probability sum out of range",
            Self::WorldInitFailed => "world init failed",
            Self::AggregateInitFailed => "aggregate init failed",
            Self::HandlesNotWired => "server handles not wired",
            Self::LoadWorldFailed => "load world failed",
            Self::ManagerNotWired => "simulation manager not wired",
            Self::StartFailed => "start failed",
            Self::SnapshotUnavailable => "snapshot unavailable",
            Self::SnapshotSendFailed => "snapshot send failed",
            Self::NothingToSave => "nothing to save",
            Self::SaveFailed => "save failed",
            Self::LoadFailed => "load failed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip_and_are_distinct() {
        let all = [
            ErrorCode::PermissionDenied,
            ErrorCode::StateConflict,
            ErrorCode::InvalidParams,
            ErrorCode::BadProbabilitySum,
            ErrorCode::WorldInitFailed,
            ErrorCode::AggregateInitFailed,
            ErrorCode::HandlesNotWired,
            ErrorCode::LoadWorldFailed,
            ErrorCode::ManagerNotWired,
            ErrorCode::StartFailed,
            ErrorCode::SnapshotUnavailable,
            ErrorCode::SnapshotSendFailed,
            ErrorCode::NothingToSave,
            ErrorCode::SaveFailed,
            ErrorCode::LoadFailed,
        ];
        for (i, code) in all.iter().enumerate() {
            assert_eq!(code.wire(), (i + 1) as u32);
            assert_eq!(ErrorCode::from_wire(code.wire()), Some(*code));
        }
        assert_eq!(ErrorCode::from_wire(0), None);
        assert_eq!(ErrorCode::from_wire(16), None);
    }

    #[test]
    fn fatal_classification() {
        assert!(ProtoError::Disconnected.is_connection_fatal());
        assert!(ProtoError::OversizedPayload { len: 1 << 30 }.is_connection_fatal());
        assert!(!ProtoError::UnknownType { code: 999 }.is_connection_fatal());
        assert!(!ProtoError::Malformed {
            detail: "short".into()
        }
        .is_connection_fatal());
    }
}
