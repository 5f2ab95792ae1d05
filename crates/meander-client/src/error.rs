//! Client-side error types.

use std::error::Error;
use std::fmt;
use std::io;

use meander_proto::{ErrorCode, MsgType, ProtoError};

/// Errors from the client API.
#[derive(Debug)]
pub enum ClientError {
    /// Connecting or configuring the socket failed.
    Io(io::Error),
    /// A framing or codec failure.
    Proto(ProtoError),
    /// The handshake or a request produced a reply of the wrong type.
    UnexpectedReply {
        /// The type that arrived.
        got: MsgType,
    },
    /// The server rejected the request.
    Server {
        /// Taxonomy code from the ERROR payload.
        code: ErrorCode,
        /// Advisory message from the ERROR payload.
        message: String,
    },
    /// The synchronous wait timed out. The server may still perform the
    /// work; only the local wait is abandoned.
    Timeout,
    /// The connection is gone.
    Disconnected,
}

impl ClientError {
    /// The server error code, when this is a server rejection.
    pub fn server_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "socket error: {e}"),
            Self::Proto(e) => write!(f, "protocol error: {e}"),
            Self::UnexpectedReply { got } => write!(f, "unexpected reply type {got:?}"),
            Self::Server { code, message } => {
                write!(f, "server error {} ({code}): {message}", code.wire())
            }
            Self::Timeout => write!(f, "request timed out"),
            Self::Disconnected => write!(f, "connection closed"),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Proto(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtoError> for ClientError {
    fn from(e: ProtoError) -> Self {
        match e {
            ProtoError::Disconnected => Self::Disconnected,
            other => Self::Proto(other),
        }
    }
}
