//! Random sources for split decisions and worker seed diversification.
//!
//! Tree construction consumes randomness through the [`RandomSource`] trait:
//! picking centroid seeds, breaking zero-margin ties, and randomizing sides
//! when no usable hyperplane exists. Each build worker derives its own
//! deterministic stream via [`RandomSource::clone_and_reset`] plus a
//! per-worker seed offset, so a single-worker build with a fixed seed is
//! reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::metric::Side;

/// A seeded random source with a deterministic reset.
pub trait RandomSource {
    /// Next raw 32-bit value.
    fn next_u32(&mut self) -> u32;

    /// Uniform index in `[0, n)`. `n` must be nonzero.
    fn next_index(&mut self, n: u32) -> u32 {
        self.next_u32() % n
    }

    /// Fair coin flip.
    fn next_bool(&mut self) -> bool {
        self.next_u32() & 1 == 1
    }

    /// Random side for tie-breaking and degenerate splits.
    fn next_side(&mut self) -> Side {
        if self.next_bool() {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// The seed this source was created (or last re-seeded) with.
    fn seed(&self) -> u32;

    /// Re-seed this source in place.
    fn set_seed(&mut self, seed: u32);

    /// A fresh source re-wound to this source's seed.
    fn clone_and_reset(&self) -> Self
    where
        Self: Sized;
}

/// Marsaglia's KISS generator (32-bit).
///
/// Combines a linear congruential generator, an xorshift, and a
/// multiply-with-carry step. Cheap, statistically solid for partitioning
/// work, and fully deterministic across platforms, which keeps
/// single-worker builds bit-reproducible.
#[derive(Debug, Clone)]
pub struct Kiss32Random {
    x: u32,
    y: u32,
    z: u32,
    c: u32,
    seed: u32,
}

impl Kiss32Random {
    /// Default seed used when constructed with seed `0`.
    pub const DEFAULT_SEED: u32 = 123_456_789;

    /// Create a generator. A `0` seed falls back to [`Self::DEFAULT_SEED`].
    pub fn new(seed: u32) -> Self {
        let seed = if seed == 0 { Self::DEFAULT_SEED } else { seed };
        Self {
            x: seed,
            y: 362_436_000,
            z: 521_288_629,
            c: 7_654_321,
            seed,
        }
    }
}

impl Default for Kiss32Random {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RandomSource for Kiss32Random {
    fn next_u32(&mut self) -> u32 {
        self.x = 69_069_u32.wrapping_mul(self.x).wrapping_add(12_345);
        self.y ^= self.y << 13;
        self.y ^= self.y >> 17;
        self.y ^= self.y << 5;

        let t = 698_769_069_u64 + u64::from(self.z) + u64::from(self.c);
        self.c = (t >> 32) as u32;
        self.z = t as u32;

        self.x.wrapping_add(self.y).wrapping_add(self.z)
    }

    fn seed(&self) -> u32 {
        self.seed
    }

    fn set_seed(&mut self, seed: u32) {
        self.seed = seed;
        self.x = seed;
    }

    fn clone_and_reset(&self) -> Self {
        Self::new(self.seed)
    }
}

/// [`RandomSource`] backed by [`rand::rngs::StdRng`].
///
/// For callers that prefer the `rand` ecosystem's generator over KISS. The
/// seed is retained so the stream can be rewound.
#[derive(Debug, Clone)]
pub struct StdRandom {
    rng: StdRng,
    seed: u32,
}

impl StdRandom {
    pub fn new(seed: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(u64::from(seed)),
            seed,
        }
    }
}

impl RandomSource for StdRandom {
    fn next_u32(&mut self) -> u32 {
        self.rng.gen()
    }

    fn seed(&self) -> u32 {
        self.seed
    }

    fn set_seed(&mut self, seed: u32) {
        *self = Self::new(seed);
    }

    fn clone_and_reset(&self) -> Self {
        Self::new(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kiss_stream_is_deterministic() {
        let mut a = Kiss32Random::new(42);
        let mut b = Kiss32Random::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn clone_and_reset_rewinds_the_stream() {
        let mut a = Kiss32Random::new(7);
        let first: Vec<u32> = (0..10).map(|_| a.next_u32()).collect();
        let mut b = a.clone_and_reset();
        let replay: Vec<u32> = (0..10).map(|_| b.next_u32()).collect();
        assert_eq!(first, replay);
    }

    #[test]
    fn zero_seed_uses_default() {
        let mut a = Kiss32Random::new(0);
        let mut b = Kiss32Random::new(Kiss32Random::DEFAULT_SEED);
        assert_eq!(a.next_u32(), b.next_u32());
    }

    #[test]
    fn next_index_stays_in_range() {
        let mut rng = Kiss32Random::new(1);
        for _ in 0..1000 {
            assert!(rng.next_index(17) < 17);
        }
    }

    #[test]
    fn std_random_resets_like_kiss() {
        let mut a = StdRandom::new(3);
        let first: Vec<u32> = (0..10).map(|_| a.next_u32()).collect();
        let mut b = a.clone_and_reset();
        let replay: Vec<u32> = (0..10).map(|_| b.next_u32()).collect();
        assert_eq!(first, replay);
    }
}
