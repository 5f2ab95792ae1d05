//! The world grid: kind, dimensions, obstacle bitmap.
//!
//! A `Grid` is built (and possibly generated) while the control plane is
//! in the lobby, then published behind an `Arc` and never mutated again.
//! Workers and the snapshot streamer read it concurrently without locks.

use std::collections::VecDeque;

use meander_proto::{GridSize, Pos, WorldKind};
use tracing::debug;

use crate::error::WorldError;

/// Deterministic 32-bit LCG used only for reproducible obstacle maps.
/// Identical `(seed, percent)` inputs must produce byte-identical bitmaps,
/// so the constants are part of the map-generation contract.
fn lcg_next(state: &mut u32) -> u32 {
    *state = state
        .wrapping_mul(1_103_515_245)
        .wrapping_add(12_345)
        .wrapping_add(1_013_904_223);
    *state
}

/// World geometry with an obstacle bitmap (row-major, `0` = free,
/// `1` = blocked). Cell `(0, 0)` — the origin — is always free, and in
/// OBSTACLES worlds every free cell is reachable from the origin through
/// 4-connected free cells (enforced at generation time).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grid {
    kind: WorldKind,
    size: GridSize,
    obstacles: Vec<u8>,
}

impl Grid {
    /// Create an all-free grid. Rejects zero dimensions and cell counts
    /// that overflow the `u32` index space.
    pub fn new(kind: WorldKind, size: GridSize) -> Result<Self, WorldError> {
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
        Ok(Self {
            kind,
            size,
            obstacles: vec![0; cells as usize],
        })
    }

    /// Reconstruct a grid from a persisted obstacle bitmap.
    pub fn from_parts(
        kind: WorldKind,
        size: GridSize,
        obstacles: Vec<u8>,
    ) -> Result<Self, WorldError> {
        let mut grid = Self::new(kind, size)?;
        if obstacles.len() != grid.obstacles.len() {
            return Err(WorldError::BitmapSizeMismatch {
                expected: grid.obstacles.len(),
                actual: obstacles.len(),
            });
        }
        grid.obstacles = obstacles;
        grid.obstacles[0] = 0; // origin is always free
        Ok(grid)
    }

    /// World kind.
    pub fn kind(&self) -> WorldKind {
        self.kind
    }

    /// Grid dimensions.
    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Total cell count.
    pub fn cell_count(&self) -> u32 {
        self.size.cell_count()
    }

    /// Row-major cell index: `y * width + x`. Caller guarantees bounds.
    pub fn index(&self, x: i32, y: i32) -> u32 {
        y as u32 * self.size.width + x as u32
    }

    /// Whether `(x, y)` lies inside the grid.
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.size.width as i32 && y < self.size.height as i32
    }

    /// Wrap a position onto the torus with a positive remainder per axis.
    pub fn wrap(&self, p: Pos) -> Pos {
        let w = self.size.width as i32;
        let h = self.size.height as i32;
        Pos::new(p.x.rem_euclid(w), p.y.rem_euclid(h))
    }

    /// Obstacle query by index; out-of-range indices are blocked.
    pub fn is_obstacle_idx(&self, idx: u32) -> bool {
        match self.obstacles.get(idx as usize) {
            Some(&b) => b != 0,
            None => true,
        }
    }

    /// Obstacle query by coordinates; out-of-bounds cells are blocked.
    pub fn is_obstacle_xy(&self, x: i32, y: i32) -> bool {
        if !self.in_bounds(x, y) {
            return true;
        }
        self.is_obstacle_idx(self.index(x, y))
    }

    /// Set or clear one obstacle cell. Out-of-bounds writes are ignored.
    pub fn set_obstacle(&mut self, x: i32, y: i32, blocked: bool) {
        if self.in_bounds(x, y) {
            let idx = self.index(x, y) as usize;
            self.obstacles[idx] = blocked as u8;
        }
    }

    /// The raw obstacle bitmap, row-major.
    pub fn obstacles(&self) -> &[u8] {
        &self.obstacles
    }

    /// Number of free (non-blocked) cells.
    pub fn free_cell_count(&self) -> u32 {
        self.obstacles.iter().filter(|&&b| b == 0).count() as u32
    }

    /// Populate the bitmap from the deterministic generator: each cell is
    /// blocked iff `lcg() % 100 < clamp(percent, 0, 100)`, the origin is
    /// forced free, and reachability is repaired so that every free cell
    /// has a 4-connected path to the origin.
    pub fn generate_obstacles(&mut self, percent: u32, seed: u32) {
        let percent = percent.min(100);
        let mut state = seed;
        for cell in self.obstacles.iter_mut() {
            let r = lcg_next(&mut state) % 100;
            *cell = (r < percent) as u8;
        }
        self.obstacles[0] = 0;
        self.repair_reachability();
    }

    /// Clear axis-aligned corridors until a BFS from the origin reaches
    /// every free cell. A corridor runs first along x to column 0, then
    /// along y to the origin, so the repaired map always admits a
    /// Manhattan path.
    fn repair_reachability(&mut self) {
        loop {
            let reachable = self.reachable_from_origin();
            let stranded = (0..self.obstacles.len())
                .find(|&i| self.obstacles[i] == 0 && !reachable[i]);
            let Some(idx) = stranded else { break };

            let x = (idx as u32 % self.size.width) as i32;
            let y = (idx as u32 / self.size.width) as i32;
            debug!(x, y, "clearing corridor for stranded free cell");
            for cx in 0..=x {
                self.set_obstacle(cx, y, false);
            }
            for cy in 0..=y {
                self.set_obstacle(0, cy, false);
            }
        }
    }

    /// 4-connected BFS over free cells starting at the origin.
    pub fn reachable_from_origin(&self) -> Vec<bool> {
        let n = self.obstacles.len();
        let mut visited = vec![false; n];
        if self.obstacles[0] != 0 {
            return visited;
        }
        let mut queue = VecDeque::new();
        visited[0] = true;
        queue.push_back(Pos::ORIGIN);
        while let Some(p) = queue.pop_front() {
            for (dx, dy) in [(0, -1), (0, 1), (-1, 0), (1, 0)] {
                let (nx, ny) = (p.x + dx, p.y + dy);
                if !self.in_bounds(nx, ny) || self.is_obstacle_xy(nx, ny) {
                    continue;
                }
                let i = self.index(nx, ny) as usize;
                if !visited[i] {
                    visited[i] = true;
                    queue.push_back(Pos::new(nx, ny));
                }
            }
        }
        visited
    }
}
