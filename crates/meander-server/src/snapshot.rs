//! Chunked snapshot streaming.
//!
//! A snapshot is BEGIN, then for each included field a run of CHUNK
//! messages covering the field's byte array in consecutive, gap-free,
//! non-overlapping ranges of at most 4096 payload bytes, then END.
//! Snapshots are visualization aids: there is no atomicity across fields,
//! and a batch running concurrently may update the aggregate mid-stream.
//!
//! Streams use blocking writes under the target's writer lock; the client
//! is expected to drain promptly via its dispatcher. A broken client
//! aborts only its own stream.

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU32, Ordering};

use meander_proto::{
    frame, Message, ProtoError, SnapshotBegin, SnapshotChunk, SnapshotField, MAX_CHUNK_PAYLOAD,
};
use meander_world::{Aggregate, Grid};
use tracing::{debug, warn};

use crate::context::{ClientEntry, ServerContext};

/// Allocates snapshot ids and streams world + aggregate to clients.
pub struct SnapshotStreamer {
    next_id: AtomicU32,
}

impl Default for SnapshotStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStreamer {
    /// Ids start at 1; 0 never appears on the wire.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
        }
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Stream one snapshot to a single client.
    pub fn stream_to(
        &self,
        entry: &ClientEntry,
        grid: &Grid,
        aggregate: &Aggregate,
    ) -> Result<(), ProtoError> {
        let id = self.allocate_id();
        entry.with_writer(|stream| stream_snapshot(stream, id, grid, aggregate))
    }

    /// Stream one snapshot (one id) to every connected client in turn.
    pub fn broadcast(&self, ctx: &ServerContext, grid: &Grid, aggregate: &Aggregate) {
        let id = self.allocate_id();
        for entry in ctx.client_entries() {
            let result =
                entry.with_writer(|stream| stream_snapshot(stream, id, grid, aggregate));
            if let Err(e) = result {
                warn!(pid = entry.pid, error = %e, "snapshot stream failed");
            }
        }
        debug!(id, "snapshot broadcast complete");
    }
}

fn included_fields() -> u32 {
    SnapshotField::ALL.iter().map(|f| f.bit()).sum()
}

fn stream_snapshot(
    stream: &UnixStream,
    id: u32,
    grid: &Grid,
    aggregate: &Aggregate,
) -> Result<(), ProtoError> {
    let begin = SnapshotBegin {
        snapshot_id: id,
        size: grid.size(),
        world_kind: grid.kind(),
        cell_count: grid.cell_count(),
        included_fields: included_fields(),
    };
    frame::send_msg(stream, &Message::SnapshotBegin(begin))?;

    for field in SnapshotField::ALL {
        // Each field is copied out once; cross-field consistency is
        // explicitly not promised while a batch is running.
        let bytes = match field {
            SnapshotField::Obstacles => grid.obstacles().to_vec(),
            _ => aggregate
                .stats_bytes(field)
                .unwrap_or_default(),
        };
        send_field_chunks(stream, id, field, &bytes)?;
    }

    frame::send_msg(stream, &Message::SnapshotEnd)
}

/// Emit one field as consecutive chunks with no gap and no overlap.
fn send_field_chunks(
    stream: &UnixStream,
    id: u32,
    field: SnapshotField,
    bytes: &[u8],
) -> Result<(), ProtoError> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        let len = (bytes.len() - offset).min(MAX_CHUNK_PAYLOAD);
        let chunk = SnapshotChunk {
            snapshot_id: id,
            field: field.wire(),
            offset_bytes: offset as u32,
            data: bytes[offset..offset + len].to_vec(),
        };
        frame::send_msg(stream, &Message::SnapshotChunk(chunk))?;
        offset += len;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meander_proto::{recv_msg, GridSize, WorldKind};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    /// Drain one full snapshot stream from a raw socket and return the
    /// begin header plus per-field (offset, len) coverage.
    fn collect_stream(stream: &UnixStream) -> (SnapshotBegin, HashMap<u16, Vec<(u32, u32)>>) {
        let begin = match recv_msg(stream).unwrap() {
            Message::SnapshotBegin(b) => b,
            other => panic!("expected begin, got {other:?}"),
        };
        let mut coverage: HashMap<u16, Vec<(u32, u32)>> = HashMap::new();
        loop {
            match recv_msg(stream).unwrap() {
                Message::SnapshotChunk(c) => {
                    assert_eq!(c.snapshot_id, begin.snapshot_id);
                    coverage
                        .entry(c.field)
                        .or_default()
                        .push((c.offset_bytes, c.data.len() as u32));
                }
                Message::SnapshotEnd => break,
                other => panic!("unexpected message {other:?}"),
            }
        }
        (begin, coverage)
    }

    #[test]
    fn chunk_coverage_is_exact() {
        let (server_side, client_side) = UnixStream::pair().unwrap();
        // 40x40 cells: sum_steps spans 12800 bytes → multiple chunks.
        let size = GridSize::new(40, 40);
        let grid = Arc::new(Grid::new(WorldKind::Wrap, size).unwrap());
        let aggregate = Arc::new(Aggregate::new(size).unwrap());

        let streamer = SnapshotStreamer::new();
        let writer = thread::spawn(move || {
            stream_snapshot(&server_side, streamer.allocate_id(), &grid, &aggregate).unwrap();
        });

        let (begin, coverage) = collect_stream(&client_side);
        writer.join().unwrap();

        assert_eq!(begin.cell_count, 1600);
        assert_eq!(begin.included_fields, 0b1111);
        for field in SnapshotField::ALL {
            let total = begin.cell_count as u64 * field.elem_width() as u64;
            let ranges = &coverage[&field.wire()];
            // Consecutive, gap-free, non-overlapping, covering [0, total).
            let mut expected_offset = 0u64;
            for &(offset, len) in ranges {
                assert_eq!(offset as u64, expected_offset, "gap or overlap in {field:?}");
                assert!(len as usize <= MAX_CHUNK_PAYLOAD);
                expected_offset += len as u64;
            }
            assert_eq!(expected_offset, total, "field {field:?} incomplete");
        }
    }

    #[test]
    fn ids_increase_monotonically() {
        let streamer = SnapshotStreamer::new();
        let a = streamer.allocate_id();
        let b = streamer.allocate_id();
        let c = streamer.allocate_id();
        assert!(a < b && b < c);
        assert_eq!(a, 1);
    }
}
