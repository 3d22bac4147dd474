//! Deterministic random number generator
//!
//! xorshift64, reproducible across platforms: the same seed produces the
//! same sequence everywhere, which is what makes a variant index stable.

use serde::{Deserialize, Serialize};

/// A deterministic random number generator for variant sampling
///
/// Never use a non-deterministic source for document randomness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRng {
    state: u64,
}

impl VariantRng {
    /// Create a new RNG with the given seed
    pub fn new(seed: u64) -> Self {
        // xorshift requires a non-zero state
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Generate the next raw u64 value
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform integer in `[0, bound)`; `bound` must be non-zero
    ///
    /// Uses rejection sampling so small bounds are unbiased.
    pub fn below(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let x = self.next_u64();
            if x < zone {
                return x % bound;
            }
        }
    }

    /// Draw `count` indices from `[0, pool)`
    ///
    /// Without replacement the picks are pairwise distinct (partial
    /// Fisher-Yates); the caller guarantees `count <= pool` in that case.
    pub fn pick_indices(&mut self, pool: usize, count: usize, with_replacement: bool) -> Vec<usize> {
        if pool == 0 {
            return Vec::new();
        }
        if with_replacement {
            return (0..count)
                .map(|_| self.below(pool as u64) as usize)
                .collect();
        }
        let mut items: Vec<usize> = (0..pool).collect();
        let count = count.min(pool);
        for i in 0..count {
            let j = i + self.below((pool - i) as u64) as usize;
            items.swap(i, j);
        }
        items.truncate(count);
        items
    }
}
