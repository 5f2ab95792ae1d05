//! Server-level error types.

use std::error::Error;
use std::fmt;
use std::io;

use meander_world::WorldError;

/// Errors starting or running the server.
#[derive(Debug)]
pub enum ServerError {
    /// Socket setup or teardown failed.
    Io(io::Error),
    /// Building the initial world failed.
    World(WorldError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "socket error: {e}"),
            Self::World(e) => write!(f, "world init failed: {e}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::World(e) => Some(e),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WorldError> for ServerError {
    fn from(e: WorldError) -> Self {
        Self::World(e)
    }
}
