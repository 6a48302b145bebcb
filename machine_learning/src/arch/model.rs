use ndarray::{Array2, ArrayView2};

use crate::{Result, arch::loss::LossFn};

/// What a named slice of the flat parameter vector represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// A weight matrix stored row major as `(fan_in, fan_out)` and exported as
    /// `[fan_out, fan_in]`.
    Weight { fan_in: usize, fan_out: usize },
    Bias { fan_in: usize, fan_out: usize },
}

/// A named, contiguous region of a model's flat parameter vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub offset: usize,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn len(&self) -> usize {
        match self.kind {
            ParamKind::Weight { fan_in, fan_out } => fan_in * fan_out,
            ParamKind::Bias { fan_out, .. } => fan_out,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The amount of inputs feeding the layer this parameter belongs to.
    pub fn fan_in(&self) -> usize {
        match self.kind {
            ParamKind::Weight { fan_in, .. } | ParamKind::Bias { fan_in, .. } => fan_in,
        }
    }

    /// The shape under which this parameter is exported.
    pub fn shape(&self) -> Vec<usize> {
        match self.kind {
            ParamKind::Weight { fan_in, fan_out } => vec![fan_out, fan_in],
            ParamKind::Bias { fan_out, .. } => vec![fan_out],
        }
    }
}

pub trait Model: Send {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Describes every parameter of the model in the order they are laid out in the flat vector.
    fn param_specs(&self) -> Vec<ParamSpec>;

    /// Makes a forward pass through the model.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - A batch of inputs, one per row.
    ///
    /// # Returns
    /// The output for every row of the batch.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Propagates `d`, the derivative of the loss with respect to the last output, back
    /// through the model. The gradient is written into `grad`, overwriting its contents.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<()>;

    /// Computes the loss over a batch and writes its gradient with respect to `params` into
    /// `grad`.
    ///
    /// # Returns
    /// The loss of the batch.
    fn compute_gradient<L: LossFn>(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        loss_fn: &L,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<f32> {
        let y_pred = self.forward(params, x)?;
        let loss = loss_fn.loss(y_pred.view(), y);
        let d = loss_fn.loss_prime(y_pred.view(), y);
        self.backward(params, grad, d)?;
        Ok(loss)
    }
}
