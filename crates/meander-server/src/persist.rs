//! Results persistence: the RWRES v1 file format.
//!
//! Layout (all integers little-endian, no padding):
//!
//! ```text
//! magic       8 bytes  "RWRES\0\0\0"
//! version     u32      1
//! world_kind  u32
//! width       u32
//! height      u32
//! probs       4 × f64  up, down, left, right
//! k_max_steps u32
//! total_reps  u32
//! obstacles   cell_count × u8
//! trials      cell_count × u32
//! sum_steps   cell_count × u64
//! successes   cell_count × u32
//! ```
//!
//! The same file serves both LOAD_RESULTS (everything) and LOAD_WORLD
//! (geometry only; statistics are discarded and the aggregate reset).

use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use meander_proto::{GridSize, MoveProbs, WorldKind};
use meander_world::{Aggregate, Grid, WorldError};
use tracing::info;

use crate::context::SimConfig;

const MAGIC: [u8; 8] = *b"RWRES\0\0\0";
const VERSION: u32 = 1;

// ── Errors ───────────────────────────────────────────────────────

/// Errors reading or writing a results file.
#[derive(Debug)]
pub enum PersistError {
    /// Filesystem error.
    Io(io::Error),
    /// The file does not start with the RWRES magic.
    BadMagic,
    /// The file's format version is not supported.
    UnsupportedVersion {
        /// Version found in the file.
        found: u32,
    },
    /// A header field is out of range.
    BadHeader {
        /// Description of the defect.
        detail: String,
    },
    /// Rebuilding the world from file contents failed.
    World(WorldError),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "file error: {e}"),
            Self::BadMagic => write!(f, "not a results file (bad magic)"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported results file version {found}")
            }
            Self::BadHeader { detail } => write!(f, "bad results header: {detail}"),
            Self::World(e) => write!(f, "world rebuild failed: {e}"),
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::World(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PersistError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WorldError> for PersistError {
    fn from(e: WorldError) -> Self {
        Self::World(e)
    }
}

// ── File model ───────────────────────────────────────────────────

/// Fully parsed results file.
pub struct ResultsFile {
    /// Persisted configuration (multi-user is not persisted and defaults
    /// to off).
    pub config: SimConfig,
    /// Obstacle bitmap.
    pub obstacles: Vec<u8>,
    /// Trials array.
    pub trials: Vec<u32>,
    /// Sum-steps array.
    pub sum_steps: Vec<u64>,
    /// Successes array.
    pub successes: Vec<u32>,
}

impl ResultsFile {
    /// Rebuild the grid from the file's geometry.
    pub fn build_grid(&self) -> Result<Grid, WorldError> {
        Grid::from_parts(
            self.config.world_kind,
            self.config.size,
            self.obstacles.clone(),
        )
    }

    /// Rebuild the aggregate from the file's statistics.
    pub fn build_aggregate(&self) -> Result<Aggregate, WorldError> {
        Aggregate::from_parts(
            self.config.size,
            self.trials.clone(),
            self.sum_steps.clone(),
            self.successes.clone(),
        )
    }
}

// ── IO primitives ────────────────────────────────────────────────

fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), PersistError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u64_le(w: &mut dyn Write, v: u64) -> Result<(), PersistError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f64_le(w: &mut dyn Write, v: f64) -> Result<(), PersistError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u32_le(r: &mut dyn Read) -> Result<u32, PersistError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le(r: &mut dyn Read) -> Result<u64, PersistError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64_le(r: &mut dyn Read) -> Result<f64, PersistError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

// ── Save ─────────────────────────────────────────────────────────

/// Write the configuration, obstacle bitmap, and aggregate arrays.
pub fn save_results(
    path: &Path,
    config: &SimConfig,
    grid: &Grid,
    aggregate: &Aggregate,
) -> Result<(), PersistError> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    w.write_all(&MAGIC)?;
    write_u32_le(&mut w, VERSION)?;
    write_u32_le(&mut w, config.world_kind.wire())?;
    write_u32_le(&mut w, config.size.width)?;
    write_u32_le(&mut w, config.size.height)?;
    write_f64_le(&mut w, config.probs.p_up)?;
    write_f64_le(&mut w, config.probs.p_down)?;
    write_f64_le(&mut w, config.probs.p_left)?;
    write_f64_le(&mut w, config.probs.p_right)?;
    write_u32_le(&mut w, config.k_max_steps)?;
    write_u32_le(&mut w, config.total_reps)?;

    w.write_all(grid.obstacles())?;
    for v in aggregate.trials() {
        write_u32_le(&mut w, v)?;
    }
    for v in aggregate.sum_steps() {
        write_u64_le(&mut w, v)?;
    }
    for v in aggregate.successes() {
        write_u32_le(&mut w, v)?;
    }
    w.flush()?;
    info!(path = %path.display(), "results saved");
    Ok(())
}

// ── Load ─────────────────────────────────────────────────────────

/// Parse a results file completely.
pub fn load_file(path: &Path) -> Result<ResultsFile, PersistError> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(PersistError::BadMagic);
    }
    let version = read_u32_le(&mut r)?;
    if version != VERSION {
        return Err(PersistError::UnsupportedVersion { found: version });
    }

    let kind_raw = read_u32_le(&mut r)?;
    let world_kind = WorldKind::from_wire(kind_raw).ok_or(PersistError::BadHeader {
        detail: format!("unknown world kind {kind_raw}"),
    })?;
    let width = read_u32_le(&mut r)?;
    let height = read_u32_le(&mut r)?;
    if width == 0 || height == 0 {
        return Err(PersistError::BadHeader {
            detail: format!("zero dimension {width}x{height}"),
        });
    }
    let cells = width as u64 * height as u64;
    if cells > u32::MAX as u64 {
        return Err(PersistError::BadHeader {
            detail: format!("cell count {cells} out of range"),
        });
    }
    let probs = MoveProbs {
        p_up: read_f64_le(&mut r)?,
        p_down: read_f64_le(&mut r)?,
        p_left: read_f64_le(&mut r)?,
        p_right: read_f64_le(&mut r)?,
    };
    let k_max_steps = read_u32_le(&mut r)?;
    let total_reps = read_u32_le(&mut r)?;

    let n = cells as usize;
    let mut obstacles = vec![0u8; n];
    r.read_exact(&mut obstacles)?;
    let mut trials = Vec::with_capacity(n);
    for _ in 0..n {
        trials.push(read_u32_le(&mut r)?);
    }
    let mut sum_steps = Vec::with_capacity(n);
    for _ in 0..n {
        sum_steps.push(read_u64_le(&mut r)?);
    }
    let mut successes = Vec::with_capacity(n);
    for _ in 0..n {
        successes.push(read_u32_le(&mut r)?);
    }

    Ok(ResultsFile {
        config: SimConfig {
            world_kind,
            size: GridSize::new(width, height),
            probs,
            k_max_steps,
            total_reps,
            multi_user: false,
        },
        obstacles,
        trials,
        sum_steps,
        successes,
    })
}
