//! src/sampler.rs
//! Per-epoch record orderings for the loader.
//!
//! A `Sampler` yields positions into the loader's slice of the index.
//!  * `SequentialSampler` – yields 0..end in order, every epoch.
//!  * `ShuffleSampler`    – a fresh deterministic permutation per epoch,
//!                          seeded from `seed + epoch`.

use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::{RngCore, SeedableRng};

/// Trait for index producers that restart at every epoch.
pub trait Sampler: Send {
    /// Return the next position, or `None` when the epoch is exhausted.
    fn next_index(&mut self) -> Option<usize>;
    /// Positions left in the current epoch.
    fn remaining(&self) -> usize;
    /// Rewind for `epoch`, regenerating the order if the sampler shuffles.
    fn reset(&mut self, epoch: u64);
}

/// Index order, identical every epoch.
#[derive(Debug, Clone, Default)]
pub struct SequentialSampler {
    pos: usize,
    len: usize,
}

impl SequentialSampler {
    pub fn new(len: usize) -> Self {
        Self { pos: 0, len }
    }
}

impl Sampler for SequentialSampler {
    fn next_index(&mut self) -> Option<usize> {
        (self.pos < self.len).then(|| {
            self.pos += 1;
            self.pos - 1
        })
    }

    fn remaining(&self) -> usize {
        self.len - self.pos
    }

    fn reset(&mut self, _epoch: u64) {
        self.pos = 0;
    }
}

/// Yields all positions `0..len` in a shuffled order that depends only on
/// `seed` and the epoch number.
#[derive(Debug, Clone)]
pub struct ShuffleSampler {
    indices: Vec<usize>,
    pos: usize,
    seed: u64,
}

impl ShuffleSampler {
    /// Create a shuffled sampler for `len` items, positioned at epoch 0.
    pub fn new(len: usize, seed: u64) -> Self {
        let mut s = Self { indices: (0..len).collect(), pos: 0, seed };
        s.reset(0);
        s
    }

    /// The permutation for the current epoch.
    pub fn order(&self) -> &[usize] {
        &self.indices
    }
}

/// Permutation of `0..len` for one epoch.
pub fn epoch_permutation(len: usize, seed: u64, epoch: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    shuffle_in_place(&mut indices, seed.wrapping_add(epoch));
    indices
}

fn shuffle_in_place(indices: &mut [usize], seed: u64) {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);

    // Fisher-Yates
    for i in (1..indices.len()).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        indices.swap(i, j);
    }
}

impl Sampler for ShuffleSampler {
    fn next_index(&mut self) -> Option<usize> {
        let i = *self.indices.get(self.pos)?;
        self.pos += 1;
        Some(i)
    }

    fn remaining(&self) -> usize {
        self.indices.len().saturating_sub(self.pos)
    }

    fn reset(&mut self, epoch: u64) {
        // regenerate from identity so the order depends on (seed, epoch) alone
        for (slot, i) in self.indices.iter_mut().zip(0..) {
            *slot = i;
        }
        shuffle_in_place(&mut self.indices, self.seed.wrapping_add(epoch));
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(s: &mut dyn Sampler) -> Vec<usize> {
        let mut out = Vec::new();
        while let Some(i) = s.next_index() {
            out.push(i);
        }
        out
    }

    #[test]
    fn sequential_restarts_each_epoch() {
        let mut s = SequentialSampler::new(4);
        assert_eq!(s.remaining(), 4);
        assert_eq!(drain(&mut s), [0, 1, 2, 3]);
        assert_eq!(s.remaining(), 0);
        s.reset(9);
        assert_eq!(drain(&mut s), [0, 1, 2, 3]);
    }

    #[test]
    fn same_seed_same_order() {
        let first = drain(&mut ShuffleSampler::new(10, 42));
        assert_eq!(first, drain(&mut ShuffleSampler::new(10, 42)));
        assert_ne!(first, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_changes_between_epochs() {
        let mut s = ShuffleSampler::new(32, 7);
        let first = s.order().to_vec();
        s.reset(1);
        let second = s.order().to_vec();
        assert_ne!(first, second);

        let mut sorted = second.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn epoch_order_depends_on_seed_plus_epoch() {
        // (seed 5, epoch 1) and (seed 6, epoch 0) share the same effective seed
        assert_eq!(epoch_permutation(20, 5, 1), epoch_permutation(20, 6, 0));
        let mut s = ShuffleSampler::new(20, 5);
        s.reset(3);
        assert_eq!(s.order(), epoch_permutation(20, 5, 3).as_slice());
    }
}
