//! Client-side snapshot reassembly.
//!
//! BEGIN resets the assembly and allocates only the fields the server
//! declared in the included-fields bitmask. Chunks carrying a stale
//! snapshot id are ignored (a new BEGIN may overtake chunks of an
//! abandoned stream); in-range chunks are bounds-checked in bytes with
//! overflow-safe comparisons before copying. END finalizes the assembly
//! into typed per-field arrays for the consumer.

use std::error::Error;
use std::fmt;

use meander_proto::{GridSize, SnapshotBegin, SnapshotChunk, SnapshotField, WorldKind};

// ── Errors ───────────────────────────────────────────────────────

/// Errors from snapshot reassembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssembleError {
    /// BEGIN announced a cell count inconsistent with its dimensions.
    BadBegin {
        /// Description of the inconsistency.
        detail: String,
    },
    /// A chunk referenced a field missing from the announced bitmask or
    /// unknown to this client.
    UnknownField {
        /// The field code from the chunk.
        field: u16,
    },
    /// A chunk's byte range falls outside the field's array.
    OutOfBounds {
        /// Offending offset.
        offset: u32,
        /// Offending length.
        len: u32,
        /// Field byte length.
        total: usize,
    },
    /// A chunk arrived with no active assembly.
    NoActiveSnapshot,
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadBegin { detail } => write!(f, "bad snapshot begin: {detail}"),
            Self::UnknownField { field } => write!(f, "chunk for unknown field {field}"),
            Self::OutOfBounds { offset, len, total } => {
                write!(f, "chunk [{offset}, +{len}) outside field of {total} bytes")
            }
            Self::NoActiveSnapshot => write!(f, "chunk without an active snapshot"),
        }
    }
}

impl Error for AssembleError {}

// ── SnapshotData ─────────────────────────────────────────────────

/// A finalized snapshot: whatever fields the server included, decoded to
/// their element types. Fields absent from the bitmask are `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotData {
    /// Snapshot identifier.
    pub snapshot_id: u32,
    /// World dimensions.
    pub size: GridSize,
    /// World kind.
    pub world_kind: WorldKind,
    /// Cell count (`size.width * size.height`).
    pub cell_count: u32,
    /// Obstacle bitmap.
    pub obstacles: Option<Vec<u8>>,
    /// Per-cell trial counts.
    pub trials: Option<Vec<u32>>,
    /// Per-cell accumulated steps of arriving walks.
    pub sum_steps: Option<Vec<u64>>,
    /// Per-cell success counts.
    pub successes: Option<Vec<u32>>,
}

// ── Assembler ────────────────────────────────────────────────────

struct Assembly {
    begin: SnapshotBegin,
    buffers: [Option<Vec<u8>>; 4],
}

/// Reassembles one chunked snapshot stream at a time.
#[derive(Default)]
pub struct SnapshotAssembler {
    active: Option<Assembly>,
}

impl SnapshotAssembler {
    /// Empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new assembly, dropping any previous one. Allocates only
    /// the fields named in the bitmask.
    pub fn begin(&mut self, begin: SnapshotBegin) -> Result<(), AssembleError> {
        let expected = begin.size.width as u64 * begin.size.height as u64;
        if expected != begin.cell_count as u64 || begin.cell_count == 0 {
            self.active = None;
            return Err(AssembleError::BadBegin {
                detail: format!(
                    "cell count {} does not match {}x{}",
                    begin.cell_count, begin.size.width, begin.size.height
                ),
            });
        }

        let mut buffers: [Option<Vec<u8>>; 4] = [None, None, None, None];
        for field in SnapshotField::ALL {
            if begin.included_fields & field.bit() != 0 {
                let bytes = begin.cell_count as usize * field.elem_width();
                buffers[(field.wire() - 1) as usize] = Some(vec![0; bytes]);
            }
        }
        self.active = Some(Assembly { begin, buffers });
        Ok(())
    }

    /// Apply one chunk. Chunks whose snapshot id disagrees with the
    /// active assembly are silently ignored; bad ranges are rejected
    /// without touching the buffers.
    pub fn chunk(&mut self, chunk: &SnapshotChunk) -> Result<(), AssembleError> {
        let Some(assembly) = self.active.as_mut() else {
            return Err(AssembleError::NoActiveSnapshot);
        };
        if chunk.snapshot_id != assembly.begin.snapshot_id {
            return Ok(()); // stale stream, tolerate
        }

        let field = SnapshotField::from_wire(chunk.field)
            .ok_or(AssembleError::UnknownField { field: chunk.field })?;
        let Some(buffer) = assembly.buffers[(field.wire() - 1) as usize].as_mut() else {
            return Err(AssembleError::UnknownField { field: chunk.field });
        };

        // Overflow-safe range check: compare against the remainder, never
        // against `offset + len`.
        let total = buffer.len();
        let offset = chunk.offset_bytes as usize;
        let len = chunk.data.len();
        if offset > total || len > total - offset {
            return Err(AssembleError::OutOfBounds {
                offset: chunk.offset_bytes,
                len: len as u32,
                total,
            });
        }
        buffer[offset..offset + len].copy_from_slice(&chunk.data);
        Ok(())
    }

    /// Finalize the active assembly, if any, into typed arrays.
    pub fn end(&mut self) -> Option<SnapshotData> {
        let assembly = self.active.take()?;
        let [obstacles, trials, sum_steps, successes] = assembly.buffers;
        Some(SnapshotData {
            snapshot_id: assembly.begin.snapshot_id,
            size: assembly.begin.size,
            world_kind: assembly.begin.world_kind,
            cell_count: assembly.begin.cell_count,
            obstacles,
            trials: trials.map(|b| decode_u32(&b)),
            sum_steps: sum_steps.map(|b| decode_u64(&b)),
            successes: successes.map(|b| decode_u32(&b)),
        })
    }
}

fn decode_u32(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn decode_u64(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin_msg(id: u32, w: u32, h: u32, fields: u32) -> SnapshotBegin {
        SnapshotBegin {
            snapshot_id: id,
            size: GridSize::new(w, h),
            world_kind: WorldKind::Wrap,
            cell_count: w * h,
            included_fields: fields,
        }
    }

    fn all_fields() -> u32 {
        SnapshotField::ALL.iter().map(|f| f.bit()).sum()
    }

    #[test]
    fn full_assembly_round_trip() {
        let mut asm = SnapshotAssembler::new();
        asm.begin(begin_msg(5, 2, 2, all_fields())).unwrap();

        let trials: Vec<u8> = [1u32, 2, 3, 4]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        asm.chunk(&SnapshotChunk {
            snapshot_id: 5,
            field: SnapshotField::Trials.wire(),
            offset_bytes: 0,
            data: trials,
        })
        .unwrap();
        asm.chunk(&SnapshotChunk {
            snapshot_id: 5,
            field: SnapshotField::Obstacles.wire(),
            offset_bytes: 0,
            data: vec![0, 1, 0, 0],
        })
        .unwrap();
        // sum_steps split across two chunks.
        let steps: Vec<u8> = [10u64, 20, 30, 40]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        asm.chunk(&SnapshotChunk {
            snapshot_id: 5,
            field: SnapshotField::SumSteps.wire(),
            offset_bytes: 0,
            data: steps[..16].to_vec(),
        })
        .unwrap();
        asm.chunk(&SnapshotChunk {
            snapshot_id: 5,
            field: SnapshotField::SumSteps.wire(),
            offset_bytes: 16,
            data: steps[16..].to_vec(),
        })
        .unwrap();
        asm.chunk(&SnapshotChunk {
            snapshot_id: 5,
            field: SnapshotField::SuccLeqK.wire(),
            offset_bytes: 0,
            data: vec![0; 16],
        })
        .unwrap();

        let data = asm.end().unwrap();
        assert_eq!(data.snapshot_id, 5);
        assert_eq!(data.trials, Some(vec![1, 2, 3, 4]));
        assert_eq!(data.obstacles, Some(vec![0, 1, 0, 0]));
        assert_eq!(data.sum_steps, Some(vec![10, 20, 30, 40]));
        assert_eq!(data.successes, Some(vec![0, 0, 0, 0]));
    }

    #[test]
    fn stale_chunks_are_tolerated() {
        let mut asm = SnapshotAssembler::new();
        asm.begin(begin_msg(7, 2, 2, all_fields())).unwrap();
        // Chunk from an older stream: ignored, not an error.
        asm.chunk(&SnapshotChunk {
            snapshot_id: 6,
            field: SnapshotField::Obstacles.wire(),
            offset_bytes: 0,
            data: vec![1, 1, 1, 1],
        })
        .unwrap();
        let data = asm.end().unwrap();
        assert_eq!(data.obstacles, Some(vec![0, 0, 0, 0]));
    }

    #[test]
    fn out_of_bounds_chunks_rejected() {
        let mut asm = SnapshotAssembler::new();
        asm.begin(begin_msg(1, 2, 2, SnapshotField::Obstacles.bit()))
            .unwrap();
        // Field is 4 bytes; offset 3 + len 2 overruns.
        let err = asm
            .chunk(&SnapshotChunk {
                snapshot_id: 1,
                field: SnapshotField::Obstacles.wire(),
                offset_bytes: 3,
                data: vec![1, 1],
            })
            .unwrap_err();
        assert!(matches!(err, AssembleError::OutOfBounds { total: 4, .. }));

        // Adversarial offset near u32::MAX must not wrap the comparison.
        let err = asm
            .chunk(&SnapshotChunk {
                snapshot_id: 1,
                field: SnapshotField::Obstacles.wire(),
                offset_bytes: u32::MAX,
                data: vec![1],
            })
            .unwrap_err();
        assert!(matches!(err, AssembleError::OutOfBounds { .. }));
    }

    #[test]
    fn excluded_field_chunks_rejected() {
        let mut asm = SnapshotAssembler::new();
        asm.begin(begin_msg(1, 2, 2, SnapshotField::Obstacles.bit()))
            .unwrap();
        let err = asm
            .chunk(&SnapshotChunk {
                snapshot_id: 1,
                field: SnapshotField::Trials.wire(),
                offset_bytes: 0,
                data: vec![0; 16],
            })
            .unwrap_err();
        assert!(matches!(err, AssembleError::UnknownField { .. }));
    }

    #[test]
    fn new_begin_replaces_previous_assembly() {
        let mut asm = SnapshotAssembler::new();
        asm.begin(begin_msg(1, 2, 2, all_fields())).unwrap();
        asm.begin(begin_msg(2, 3, 3, SnapshotField::Trials.bit()))
            .unwrap();
        let data = asm.end().unwrap();
        assert_eq!(data.snapshot_id, 2);
        assert_eq!(data.cell_count, 9);
        assert!(data.obstacles.is_none());
        assert_eq!(data.trials, Some(vec![0; 9]));
    }

    #[test]
    fn inconsistent_begin_rejected() {
        let mut asm = SnapshotAssembler::new();
        let mut bad = begin_msg(1, 4, 4, all_fields());
        bad.cell_count = 15;
        assert!(asm.begin(bad).is_err());
        assert!(asm.end().is_none());
    }

    #[test]
    fn end_without_begin_is_none() {
        let mut asm = SnapshotAssembler::new();
        assert!(asm.end().is_none());
        assert_eq!(
            asm.chunk(&SnapshotChunk {
                snapshot_id: 1,
                field: 1,
                offset_bytes: 0,
                data: vec![],
            }),
            Err(AssembleError::NoActiveSnapshot)
        );
    }
}
