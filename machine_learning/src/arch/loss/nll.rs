use ndarray::{Array2, ArrayView2};

use super::LossFn;

/// Negative log likelihood over log probabilities, averaged over the batch.
///
/// Targets are one-hot rows, so the loss of a row is minus its log probability at the target
/// class.
#[derive(Default, Clone, Copy)]
pub struct NllLoss;

impl NllLoss {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for NllLoss {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let n = y_pred.nrows().max(1) as f32;
        -(&y_pred * &y).sum() / n
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.nrows().max(1) as f32;
        y.mapv(|t| -t / n)
    }
}
