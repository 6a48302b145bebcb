use std::num::NonZeroUsize;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{MlErr, Result};

/// Splits the indices of a dataset into one equally sized shard per replica.
///
/// Every replica builds the same permutation from `seed + epoch` and keeps the positions
/// `rank, rank + R, rank + 2R, ...` of it, so shards never overlap and together cover the
/// dataset. When the length isn't divisible by the amount of replicas the permutation is
/// either padded by repeating it from the start or truncated, depending on `drop_last`.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    num_replicas: usize,
    rank: usize,
    shuffle: bool,
    seed: u64,
    drop_last: bool,
    epoch: u64,
}

impl DistributedSampler {
    /// Creates a new `DistributedSampler` that shuffles with seed `0` and pads the remainder.
    ///
    /// # Arguments
    /// * `len` - The length of the dataset.
    /// * `num_replicas` - The amount of replicas sharing the dataset.
    /// * `rank` - The replica this sampler yields indices for.
    ///
    /// # Returns
    /// An error if `rank` is out of range.
    pub fn new(len: usize, num_replicas: NonZeroUsize, rank: usize) -> Result<Self> {
        let num_replicas = num_replicas.get();
        if rank >= num_replicas {
            return Err(MlErr::InvalidConfig(format!(
                "sampler rank {rank} out of range for {num_replicas} replicas"
            )));
        }

        Ok(Self {
            len,
            num_replicas,
            rank,
            shuffle: true,
            seed: 0,
            drop_last: false,
            epoch: 0,
        })
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Sets the epoch, which changes the permutation when shuffling.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The amount of indices in every shard.
    pub fn num_samples(&self) -> usize {
        if self.drop_last {
            self.len / self.num_replicas
        } else {
            self.len.div_ceil(self.num_replicas)
        }
    }

    /// The length of the permutation after padding or truncating.
    pub fn total_size(&self) -> usize {
        self.num_samples() * self.num_replicas
    }

    /// Returns this replica's shard for the current epoch.
    pub fn indices(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len).collect();

        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            order.shuffle(&mut rng);
        }

        let total = self.total_size();
        if order.len() > total {
            order.truncate(total);
        } else {
            for i in 0..total - order.len() {
                order.push(order[i]);
            }
        }

        order
            .into_iter()
            .skip(self.rank)
            .step_by(self.num_replicas)
            .collect()
    }
}
