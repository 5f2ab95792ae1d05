//! Per-thread random number generation.
//!
//! Each worker thread owns its own generator; nothing here is shared.
//! Seeding mixes the realtime clock, the process id, and the thread id
//! through a splitmix64 finalizer so that workers spawned in the same
//! instant still diverge.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::process;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// splitmix64 finalizer.
fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// A per-thread walk generator producing uniform doubles in `[0, 1)`.
#[derive(Clone, Debug)]
pub struct WalkRng {
    inner: ChaCha8Rng,
}

impl WalkRng {
    /// Seed from the realtime clock, PID, and current thread id.
    pub fn from_entropy_mix() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let pid = process::id() as u64;
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        let tid = hasher.finish();

        let mut seed = mix64(nanos ^ pid.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ tid.rotate_left(32));
        if seed == 0 {
            seed = 0x6d65_616e_6465_7221;
        }
        Self::from_seed_u64(seed)
    }

    /// Seed deterministically (tests).
    pub fn from_seed_u64(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform double in `[0, 1)`, built from the top 53 bits of a draw.
    pub fn next01(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_are_in_unit_interval() {
        let mut rng = WalkRng::from_seed_u64(7);
        for _ in 0..10_000 {
            let v = rng.next01();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let mut a = WalkRng::from_seed_u64(42);
        let mut b = WalkRng::from_seed_u64(42);
        for _ in 0..100 {
            assert_eq!(a.next01().to_bits(), b.next01().to_bits());
        }
    }

    #[test]
    fn entropy_mix_diverges_across_instances() {
        // Two generators created back to back must not produce the same
        // stream (thread id and clock feed the seed).
        let mut a = WalkRng::from_entropy_mix();
        let b = std::thread::spawn(|| {
            let mut r = WalkRng::from_entropy_mix();
            (0..8).map(|_| r.next01().to_bits()).collect::<Vec<_>>()
        })
        .join()
        .unwrap();
        let a_draws: Vec<_> = (0..8).map(|_| a.next01().to_bits()).collect();
        assert_ne!(a_draws, b);
    }

    #[test]
    fn rough_uniformity() {
        let mut rng = WalkRng::from_seed_u64(1234);
        let mut buckets = [0u32; 4];
        let n = 40_000;
        for _ in 0..n {
            let v = rng.next01();
            buckets[(v * 4.0) as usize] += 1;
        }
        for &count in &buckets {
            let expected = n / 4;
            assert!(
                (count as i64 - expected as i64).unsigned_abs() < expected as u64 / 10,
                "bucket count {count} too far from {expected}"
            );
        }
    }
}
