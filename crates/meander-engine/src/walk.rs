//! One random walk from a start cell toward the origin.

use meander_proto::{MoveProbs, Pos, WorldKind};
use meander_world::Grid;

use crate::rng::WalkRng;

/// Cumulative direction thresholds, computed once per run from the move
/// distribution: `c1 ≤ c2 ≤ c3 ≤ c4` for up/down/left/right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    c1: f64,
    c2: f64,
    c3: f64,
    c4: f64,
}

impl Thresholds {
    /// Build cumulative thresholds from a move distribution.
    pub fn from_probs(probs: &MoveProbs) -> Self {
        let c1 = probs.p_up;
        let c2 = c1 + probs.p_down;
        let c3 = c2 + probs.p_left;
        let c4 = c3 + probs.p_right;
        Self { c1, c2, c3, c4 }
    }

    /// Total mass; a degenerate distribution has `total() ≤ 0`.
    pub fn total(&self) -> f64 {
        self.c4
    }
}

/// Outcome of one walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Steps taken; the cap when the walk never arrived, 0 for degenerate
    /// starts.
    pub steps: u32,
    /// Whether the walk reached the origin.
    pub reached_origin: bool,
    /// Whether it arrived within the step cap. Coincides with
    /// `reached_origin` here (K is the cap); carried separately because
    /// downstream columns are distinct.
    pub success_leq_k: bool,
}

impl WalkOutcome {
    fn failed(steps: u32) -> Self {
        Self {
            steps,
            reached_origin: false,
            success_leq_k: false,
        }
    }

    fn arrived(steps: u32) -> Self {
        Self {
            steps,
            reached_origin: true,
            success_leq_k: true,
        }
    }
}

/// Run one walk from `start` until the origin or the step cap.
///
/// Rules per step: draw `r ∈ [0, 1)` scaled by the total mass, branch to
/// the first threshold exceeding it (up, down, left, right). In WRAP
/// worlds the candidate is wrapped; a candidate that is out of bounds or
/// blocked leaves the walker in place, and the step still counts toward
/// the cap. Arrival is checked after adopting the candidate.
///
/// Degenerate starts: out of bounds or on an obstacle → `(0, false,
/// false)`; on the origin → `(0, true, true)`. A distribution with no
/// mass → `(max_steps, false, false)`.
pub fn run_walk(
    grid: &Grid,
    start: Pos,
    thresholds: &Thresholds,
    max_steps: u32,
    rng: &mut WalkRng,
) -> WalkOutcome {
    if !grid.in_bounds(start.x, start.y) || grid.is_obstacle_xy(start.x, start.y) {
        return WalkOutcome::failed(0);
    }
    if start.is_origin() {
        return WalkOutcome::arrived(0);
    }
    if thresholds.total() <= 0.0 {
        return WalkOutcome::failed(max_steps);
    }

    let mut p = start;
    for step in 1..=max_steps {
        let r = rng.next01() * thresholds.total();

        let mut next = p;
        if r < thresholds.c1 {
            next.y -= 1;
        } else if r < thresholds.c2 {
            next.y += 1;
        } else if r < thresholds.c3 {
            next.x -= 1;
        } else {
            next.x += 1;
        }

        if grid.kind() == WorldKind::Wrap {
            next = grid.wrap(next);
        }
        if !grid.in_bounds(next.x, next.y) || grid.is_obstacle_xy(next.x, next.y) {
            next = p;
        }
        p = next;

        if p.is_origin() {
            return WalkOutcome::arrived(step);
        }
    }
    WalkOutcome::failed(max_steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meander_proto::GridSize;

    fn grid(kind: WorldKind, w: u32, h: u32) -> Grid {
        Grid::new(kind, GridSize::new(w, h)).unwrap()
    }

    fn only(direction: &str) -> Thresholds {
        let probs = match direction {
            "up" => MoveProbs {
                p_up: 1.0,
                p_down: 0.0,
                p_left: 0.0,
                p_right: 0.0,
            },
            "left" => MoveProbs {
                p_up: 0.0,
                p_down: 0.0,
                p_left: 1.0,
                p_right: 0.0,
            },
            "right" => MoveProbs {
                p_up: 0.0,
                p_down: 0.0,
                p_left: 0.0,
                p_right: 1.0,
            },
            _ => panic!("unknown direction"),
        };
        Thresholds::from_probs(&probs)
    }

    #[test]
    fn origin_start_succeeds_with_zero_steps() {
        let g = grid(WorldKind::Wrap, 4, 4);
        let mut rng = WalkRng::from_seed_u64(1);
        let out = run_walk(&g, Pos::ORIGIN, &only("left"), 10, &mut rng);
        assert_eq!(out, WalkOutcome::arrived(0));
    }

    #[test]
    fn degenerate_starts_fail_immediately() {
        let mut g = grid(WorldKind::Obstacles, 4, 4);
        g.set_obstacle(2, 2, true);
        let mut rng = WalkRng::from_seed_u64(1);
        let t = only("left");
        assert_eq!(
            run_walk(&g, Pos::new(-1, 0), &t, 10, &mut rng),
            WalkOutcome::failed(0)
        );
        assert_eq!(
            run_walk(&g, Pos::new(4, 0), &t, 10, &mut rng),
            WalkOutcome::failed(0)
        );
        assert_eq!(
            run_walk(&g, Pos::new(2, 2), &t, 10, &mut rng),
            WalkOutcome::failed(0)
        );
    }

    #[test]
    fn massless_distribution_exhausts_the_cap() {
        let g = grid(WorldKind::Wrap, 4, 4);
        let mut rng = WalkRng::from_seed_u64(1);
        let zero = Thresholds::from_probs(&MoveProbs {
            p_up: 0.0,
            p_down: 0.0,
            p_left: 0.0,
            p_right: 0.0,
        });
        assert_eq!(
            run_walk(&g, Pos::new(2, 1), &zero, 16, &mut rng),
            WalkOutcome::failed(16)
        );
    }

    #[test]
    fn pure_left_walk_counts_exact_steps() {
        let g = grid(WorldKind::Wrap, 5, 5);
        let mut rng = WalkRng::from_seed_u64(9);
        let out = run_walk(&g, Pos::new(3, 0), &only("left"), 10, &mut rng);
        assert_eq!(out, WalkOutcome::arrived(3));
    }

    #[test]
    fn wrap_carries_the_walker_around_the_edge() {
        // Pure right from x=1 in a width-4 torus: 2, 3, wrap to 0.
        let g = grid(WorldKind::Wrap, 4, 1);
        let mut rng = WalkRng::from_seed_u64(9);
        let out = run_walk(&g, Pos::new(1, 0), &only("right"), 10, &mut rng);
        assert_eq!(out, WalkOutcome::arrived(3));
    }

    #[test]
    fn bounded_world_pins_the_walker_at_the_edge() {
        // Pure right in an OBSTACLES world never wraps; the walker parks
        // at the east edge and burns the whole cap.
        let g = grid(WorldKind::Obstacles, 4, 1);
        let mut rng = WalkRng::from_seed_u64(9);
        let out = run_walk(&g, Pos::new(1, 0), &only("right"), 12, &mut rng);
        assert_eq!(out, WalkOutcome::failed(12));
    }

    #[test]
    fn blocked_steps_still_consume_the_cap() {
        // A wall at x=1 keeps a pure-left walker at x=2 forever.
        let mut g = grid(WorldKind::Obstacles, 4, 1);
        g.set_obstacle(1, 0, true);
        let mut rng = WalkRng::from_seed_u64(3);
        let out = run_walk(&g, Pos::new(2, 0), &only("left"), 8, &mut rng);
        assert_eq!(out, WalkOutcome::failed(8));
    }

    #[test]
    fn up_walk_arrives_on_column_zero() {
        let g = grid(WorldKind::Obstacles, 1, 6);
        let mut rng = WalkRng::from_seed_u64(5);
        let out = run_walk(&g, Pos::new(0, 4), &only("up"), 10, &mut rng);
        assert_eq!(out, WalkOutcome::arrived(4));
    }

    #[test]
    fn uniform_walk_on_tiny_torus_reaches_origin_quickly() {
        // On a 2x2 torus every move lands on a neighbour of the origin,
        // so arrival within a generous cap is certain for any seed.
        let g = grid(WorldKind::Wrap, 2, 2);
        let t = Thresholds::from_probs(&MoveProbs::UNIFORM);
        for seed in 0..20 {
            let mut rng = WalkRng::from_seed_u64(seed);
            let out = run_walk(&g, Pos::new(1, 1), &t, 10_000, &mut rng);
            assert!(out.reached_origin, "seed {seed} never arrived");
            assert!(out.steps >= 1);
        }
    }
}
