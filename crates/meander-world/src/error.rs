//! Error types for world construction.

use std::error::Error;
use std::fmt;

/// Errors from grid and aggregate construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorldError {
    /// Width or height is zero.
    EmptyDimensions,
    /// `width * height` does not fit the cell-index space.
    TooManyCells {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// A loaded obstacle bitmap does not match the grid dimensions.
    BitmapSizeMismatch {
        /// Expected byte length (`width * height`).
        expected: usize,
        /// Actual byte length supplied.
        actual: usize,
    },
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDimensions => write!(f, "grid dimensions must be non-zero"),
            Self::TooManyCells { width, height } => {
                write!(f, "grid {width}x{height} exceeds the cell-index space")
            }
            Self::BitmapSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "obstacle bitmap has {actual} bytes, expected {expected}"
                )
            }
        }
    }
}

impl Error for WorldError {}
