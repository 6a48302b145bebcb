use std::{num::NonZeroUsize, sync::Arc};

use ndarray::{Array2, ArrayView1, Zip};

use super::DistributedSampler;
use crate::{MlErr, Result, dataset::ImageDataset};

/// A batch of inputs, one image per row, and their one-hot encoded labels.
#[derive(Debug, Clone)]
pub struct Batch {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }
}

/// Groups the shard given by a `DistributedSampler` into batches of at most `batch_size`
/// samples, the last one possibly partial.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: Arc<ImageDataset>,
    sampler: DistributedSampler,
    batch_size: usize,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Returns
    /// An error if the sampler was built for a dataset of a different length.
    pub fn new(
        dataset: Arc<ImageDataset>,
        sampler: DistributedSampler,
        batch_size: NonZeroUsize,
    ) -> Result<Self> {
        if sampler.len() != dataset.len() {
            return Err(MlErr::SizeMismatch {
                what: "sampler length",
                got: sampler.len(),
                expected: dataset.len(),
            });
        }

        Ok(Self {
            dataset,
            sampler,
            batch_size: batch_size.get(),
        })
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        self.sampler.set_epoch(epoch);
    }

    pub fn sampler(&self) -> &DistributedSampler {
        &self.sampler
    }

    pub fn dataset(&self) -> &Arc<ImageDataset> {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The amount of batches yielded per epoch.
    pub fn num_batches(&self) -> usize {
        self.sampler.num_samples().div_ceil(self.batch_size)
    }

    /// Iterates over the batches of the current epoch.
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            dataset: &self.dataset,
            indices: self.sampler.indices(),
            batch_size: self.batch_size,
            pos: 0,
        }
    }
}

pub struct BatchIter<'a> {
    dataset: &'a ImageDataset,
    indices: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.indices.len() {
            return None;
        }

        let end = (self.pos + self.batch_size).min(self.indices.len());
        let batch = collate(self.dataset, &self.indices[self.pos..end]);
        self.pos = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.indices.len() - self.pos).div_ceil(self.batch_size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for BatchIter<'_> {}

fn collate(dataset: &ImageDataset, idxs: &[usize]) -> Batch {
    let mut x = Array2::zeros((idxs.len(), dataset.image_size()));
    let mut y = Array2::zeros((idxs.len(), dataset.num_classes()));

    Zip::from(x.rows_mut())
        .and(y.rows_mut())
        .and(&ArrayView1::from(idxs))
        .par_for_each(|mut x_row, mut y_row, &idx| {
            x_row.assign(&ArrayView1::from(dataset.image(idx)));
            y_row[dataset.label(idx) as usize] = 1.;
        });

    Batch { x, y }
}
