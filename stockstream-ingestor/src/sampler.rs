use rand::{rngs::StdRng, seq::index, SeedableRng};

pub const DEFAULT_SAMPLE_SIZE: usize = 6000;
pub const DEFAULT_SEED: u64 = 42;

/// Draws a reproducible subset of the source rows without replacement.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    target: usize,
    seed: u64,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE, DEFAULT_SEED)
    }
}

impl Sampler {
    pub fn new(target: usize, seed: u64) -> Self {
        Self { target, seed }
    }

    /// Returns `min(target, records.len())` records in draw order.
    pub fn sample<T>(&self, records: Vec<T>) -> Vec<T> {
        let amount = self.target.min(records.len());
        let mut rng = StdRng::seed_from_u64(self.seed);
        let picks = index::sample(&mut rng, records.len(), amount);

        let mut slots: Vec<Option<T>> = records.into_iter().map(Some).collect();
        picks
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect()
    }
}
