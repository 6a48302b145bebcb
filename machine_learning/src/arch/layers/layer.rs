use ndarray::{Array2, ArrayView2};

use super::{Dense, LogSoftmax};
use crate::{Result, arch::activations::ActFn};

#[derive(Clone, Debug)]
pub enum Layer {
    Dense(Dense),
    LogSoftmax(LogSoftmax),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Dense(self::Dense::new(dim, act_fn))
    }

    pub fn log_softmax() -> Self {
        LogSoftmax(self::LogSoftmax::new())
    }

    /// Returns the amount of parameters this layer views.
    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
            LogSoftmax(_) => 0,
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.forward(params, x),
            LogSoftmax(l) => Ok(l.forward(x)),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.backward(params, grad, d),
            LogSoftmax(l) => Ok(l.backward(d)),
        }
    }
}
