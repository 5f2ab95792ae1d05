//! Thread-safe per-cell statistics.
//!
//! Three arrays of length `width * height`, all guarded by one internal
//! mutex: `trials`, `sum_steps` (only walks that reached the origin
//! contribute), and `successes` (success within the step cap). Counters
//! are monotonically non-decreasing until [`Aggregate::clear`] or a full
//! reinit.
//!
//! Readers copy one field out under a brief lock. There is no snapshot
//! guarantee *across* fields: the snapshot streamer may observe trials
//! from one instant and sum_steps from another while workers are still
//! updating. Consumers of snapshots accept that contract; persistence
//! only runs while no batch is active.

use std::sync::Mutex;

use meander_proto::{GridSize, SnapshotField};

use crate::error::WorldError;

/// Outcome of one trajectory, as applied to the aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellUpdate {
    /// Steps taken (the cap when the walk never arrived).
    pub steps: u32,
    /// Whether the walk reached the origin.
    pub reached_origin: bool,
    /// Whether it reached the origin within the step cap. Coincides with
    /// `reached_origin` in this model; both are carried because wire and
    /// file formats treat them as distinct columns.
    pub success_leq_k: bool,
}

struct Arrays {
    trials: Vec<u32>,
    sum_steps: Vec<u64>,
    successes: Vec<u32>,
}

/// Per-cell statistics accumulator shared between the worker pool, the
/// snapshot streamer, and persistence.
pub struct Aggregate {
    size: GridSize,
    inner: Mutex<Arrays>,
}

impl Aggregate {
    /// Create a zeroed aggregate for the given dimensions.
    pub fn new(size: GridSize) -> Result<Self, WorldError> {
        if size.width == 0 || size.height == 0 {
            return Err(WorldError::EmptyDimensions);
        }
        let cells = size.width as u64 * size.height as u64;
        if cells > u32::MAX as u64 {
            return Err(WorldError::TooManyCells {
                width: size.width,
                height: size.height,
            });
        }
        let n = cells as usize;
        Ok(Self {
            size,
            inner: Mutex::new(Arrays {
                trials: vec![0; n],
                sum_steps: vec![0; n],
                successes: vec![0; n],
            }),
        })
    }

    /// Reconstruct an aggregate from persisted arrays.
    pub fn from_parts(
        size: GridSize,
        trials: Vec<u32>,
        sum_steps: Vec<u64>,
        successes: Vec<u32>,
    ) -> Result<Self, WorldError> {
        let agg = Self::new(size)?;
        let n = agg.cell_count() as usize;
        for len in [trials.len(), sum_steps.len(), successes.len()] {
            if len != n {
                return Err(WorldError::BitmapSizeMismatch {
                    expected: n,
                    actual: len,
                });
            }
        }
        {
            let mut inner = agg.inner.lock().unwrap();
            inner.trials = trials;
            inner.sum_steps = sum_steps;
            inner.successes = successes;
        }
        Ok(agg)
    }

    /// Dimensions this aggregate was built for.
    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Total cell count.
    pub fn cell_count(&self) -> u32 {
        self.size.cell_count()
    }

    /// Zero all three arrays. Called at the start of each batch.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.trials.fill(0);
        inner.sum_steps.fill(0);
        inner.successes.fill(0);
    }

    /// Record one trajectory outcome. Atomic across the three arrays:
    /// `trials` always increments, `sum_steps` accumulates only for walks
    /// that arrived, `successes` only for successes within the cap.
    /// Out-of-range indices are ignored (pre-validated upstream).
    pub fn update(&self, idx: u32, update: CellUpdate) {
        let idx = idx as usize;
        let mut inner = self.inner.lock().unwrap();
        if idx >= inner.trials.len() {
            return;
        }
        inner.trials[idx] += 1;
        if update.reached_origin {
            inner.sum_steps[idx] += update.steps as u64;
        }
        if update.success_leq_k {
            inner.successes[idx] += 1;
        }
    }

    /// Copy of the trials array.
    pub fn trials(&self) -> Vec<u32> {
        self.inner.lock().unwrap().trials.clone()
    }

    /// Copy of the sum-steps array.
    pub fn sum_steps(&self) -> Vec<u64> {
        self.inner.lock().unwrap().sum_steps.clone()
    }

    /// Copy of the successes array.
    pub fn successes(&self) -> Vec<u32> {
        self.inner.lock().unwrap().successes.clone()
    }

    /// One statistics field serialized to little-endian bytes, copied out
    /// under a brief lock. Returns `None` for
    /// [`SnapshotField::Obstacles`], which lives on the grid.
    pub fn stats_bytes(&self, field: SnapshotField) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        match field {
            SnapshotField::Obstacles => None,
            SnapshotField::Trials => Some(to_le_bytes_u32(&inner.trials)),
            SnapshotField::SumSteps => Some(to_le_bytes_u64(&inner.sum_steps)),
            SnapshotField::SuccLeqK => Some(to_le_bytes_u32(&inner.successes)),
        }
    }
}

fn to_le_bytes_u32(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn to_le_bytes_u64(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn agg(w: u32, h: u32) -> Aggregate {
        Aggregate::new(GridSize::new(w, h)).unwrap()
    }

    #[test]
    fn update_semantics() {
        let a = agg(2, 2);
        a.update(
            1,
            CellUpdate {
                steps: 7,
                reached_origin: true,
                success_leq_k: true,
            },
        );
        a.update(
            1,
            CellUpdate {
                steps: 100,
                reached_origin: false,
                success_leq_k: false,
            },
        );
        assert_eq!(a.trials()[1], 2);
        assert_eq!(a.sum_steps()[1], 7); // failed walk contributes no steps
        assert_eq!(a.successes()[1], 1);
    }

    #[test]
    fn successes_never_exceed_trials() {
        let a = agg(3, 3);
        for i in 0..9u32 {
            for _ in 0..=i {
                a.update(
                    i,
                    CellUpdate {
                        steps: 1,
                        reached_origin: i % 2 == 0,
                        success_leq_k: i % 2 == 0,
                    },
                );
            }
        }
        let trials = a.trials();
        let successes = a.successes();
        let sum_steps = a.sum_steps();
        for i in 0..9 {
            assert!(successes[i] <= trials[i]);
            if successes[i] == 0 {
                assert_eq!(sum_steps[i], 0);
            }
        }
    }

    #[test]
    fn clear_zeroes_everything() {
        let a = agg(2, 2);
        a.update(
            0,
            CellUpdate {
                steps: 3,
                reached_origin: true,
                success_leq_k: true,
            },
        );
        a.clear();
        assert!(a.trials().iter().all(|&v| v == 0));
        assert!(a.sum_steps().iter().all(|&v| v == 0));
        assert!(a.successes().iter().all(|&v| v == 0));
    }

    #[test]
    fn out_of_range_update_is_ignored() {
        let a = agg(2, 2);
        a.update(
            99,
            CellUpdate {
                steps: 1,
                reached_origin: true,
                success_leq_k: true,
            },
        );
        assert!(a.trials().iter().all(|&v| v == 0));
    }

    #[test]
    fn stats_bytes_widths() {
        let a = agg(3, 2);
        assert_eq!(a.stats_bytes(SnapshotField::Trials).unwrap().len(), 24);
        assert_eq!(a.stats_bytes(SnapshotField::SumSteps).unwrap().len(), 48);
        assert_eq!(a.stats_bytes(SnapshotField::SuccLeqK).unwrap().len(), 24);
        assert!(a.stats_bytes(SnapshotField::Obstacles).is_none());
    }

    #[test]
    fn concurrent_updates_conserve_counts() {
        let a = Arc::new(agg(4, 4));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let a = Arc::clone(&a);
            handles.push(std::thread::spawn(move || {
                for i in 0..16u32 {
                    for _ in 0..100 {
                        a.update(
                            i,
                            CellUpdate {
                                steps: 1,
                                reached_origin: true,
                                success_leq_k: true,
                            },
                        );
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let trials = a.trials();
        assert!(trials.iter().all(|&t| t == 800));
        assert_eq!(a.sum_steps().iter().sum::<u64>(), 16 * 800);
    }

    #[test]
    fn from_parts_validates_lengths() {
        let ok = Aggregate::from_parts(
            GridSize::new(2, 2),
            vec![1; 4],
            vec![2; 4],
            vec![1; 4],
        );
        assert!(ok.is_ok());
        assert_eq!(ok.unwrap().trials(), vec![1; 4]);

        let bad = Aggregate::from_parts(GridSize::new(2, 2), vec![1; 3], vec![2; 4], vec![1; 4]);
        assert!(bad.is_err());
    }
}
