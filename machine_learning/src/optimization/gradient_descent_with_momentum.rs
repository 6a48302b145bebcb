use rayon::prelude::*;

use super::Optimizer;
use crate::{MlErr, Result};

#[derive(Debug, Clone)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Box<[f32]>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        for (what, len) in [("gradient", grad.len()), ("momentum buffer", self.velocity.len())] {
            if len != params.len() {
                return Err(MlErr::SizeMismatch {
                    what,
                    got: len,
                    expected: params.len(),
                });
            }
        }

        let lr = self.learning_rate;
        let mu = self.momentum;

        params
            .par_iter_mut()
            .zip(grad)
            .zip(self.velocity.par_iter_mut())
            .for_each(|((p, g), v)| {
                *v = (mu * *v) + g;
                *p -= lr * *v;
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_accumulates() {
        let mut optimizer = GradientDescentWithMomentum::new(1, 1., 0.5);
        let mut params = [0.];

        optimizer.update_params(&[1.], &mut params).unwrap();
        assert_eq!(params, [-1.]);

        optimizer.update_params(&[1.], &mut params).unwrap();
        assert_eq!(params, [-2.5]);
    }

    #[test]
    fn buffer_size_mismatch() {
        let mut optimizer = GradientDescentWithMomentum::new(2, 0.1, 0.9);
        let mut params = [0.; 3];

        assert!(optimizer.update_params(&[0.; 3], &mut params).is_err());
    }
}
