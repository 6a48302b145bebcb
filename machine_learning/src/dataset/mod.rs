pub mod mnist;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result};

/// A labeled image classification dataset held in memory.
///
/// Pixels are stored flat, row after row, normalized to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    images: Vec<f32>,
    labels: Vec<u8>,
    image_size: usize,
    num_classes: usize,
}

impl ImageDataset {
    /// Creates a new `ImageDataset`.
    ///
    /// # Arguments
    /// * `images` - Every image, concatenated.
    /// * `labels` - The class of each image.
    /// * `image_size` - The amount of pixels of a single image.
    /// * `num_classes` - The amount of classes, every label must be below it.
    ///
    /// # Returns
    /// An error if the sizes don't agree or a label is out of range.
    pub fn new(
        images: Vec<f32>,
        labels: Vec<u8>,
        image_size: usize,
        num_classes: usize,
    ) -> Result<Self> {
        if image_size == 0 || num_classes == 0 {
            return Err(MlErr::Dataset(
                "image size and class count must be non-zero".into(),
            ));
        }

        if images.len() != labels.len() * image_size {
            return Err(MlErr::SizeMismatch {
                what: "dataset images",
                got: images.len(),
                expected: labels.len() * image_size,
            });
        }

        if let Some(label) = labels.iter().find(|&&l| l as usize >= num_classes) {
            return Err(MlErr::Dataset(format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }

        Ok(Self {
            images,
            labels,
            image_size,
            num_classes,
        })
    }

    /// Generates a deterministic dataset of `len` samples.
    ///
    /// Every image is uniform noise in `[0, 0.5)` with the pixels congruent to its label
    /// modulo `num_classes` brightened by `0.5`, so the classes are separable.
    pub fn synthetic(len: usize, image_size: usize, num_classes: usize, seed: u64) -> Result<Self> {
        if num_classes == 0 {
            return Err(MlErr::Dataset("class count must be non-zero".into()));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut images = Vec::with_capacity(len * image_size);
        let mut labels = Vec::with_capacity(len);

        let classes = u8::try_from(num_classes)
            .map_err(|_| MlErr::Dataset(format!("{num_classes} classes don't fit in a label")))?;

        for _ in 0..len {
            let label = rng.random_range(0..classes);
            labels.push(label);

            images.extend((0..image_size).map(|px| {
                let noise = rng.random::<f32>() * 0.5;
                if px % num_classes == label as usize {
                    noise + 0.5
                } else {
                    noise
                }
            }));
        }

        Self::new(images, labels, image_size, num_classes)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Returns the pixels of the `idx`th image.
    pub fn image(&self, idx: usize) -> &[f32] {
        let start = idx * self.image_size;
        &self.images[start..start + self.image_size]
    }

    pub fn label(&self, idx: usize) -> u8 {
        self.labels[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_is_deterministic() {
        let a = ImageDataset::synthetic(20, 16, 4, 3).unwrap();
        let b = ImageDataset::synthetic(20, 16, 4, 3).unwrap();

        assert_eq!(a.len(), 20);
        assert_eq!(a.image(19), b.image(19));
        assert!((0..20).all(|i| a.label(i) == b.label(i) && a.label(i) < 4));
        assert!(a.image(5).iter().all(|px| (0. ..1.).contains(px)));
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let err = ImageDataset::new(vec![0.; 4], vec![0, 2], 2, 2).unwrap_err();
        assert!(matches!(err, MlErr::Dataset(_)));
    }

    #[test]
    fn rejects_inconsistent_sizes() {
        let err = ImageDataset::new(vec![0.; 5], vec![0, 1], 2, 2).unwrap_err();
        assert!(matches!(err, MlErr::SizeMismatch { .. }));
    }
}
