use ndarray::{Array2, ArrayView2};

use super::{
    Model, ParamKind, ParamSpec,
    activations::ActFn,
    layers::{Dense, Layer},
};
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Builds a multilayer perceptron classifier: dense layers with `relu` between them and a
    /// `log_softmax` at the end.
    ///
    /// # Arguments
    /// * `input` - The width of the input rows.
    /// * `hidden` - The widths of the hidden layers.
    /// * `output` - The amount of classes.
    pub fn mlp(input: usize, hidden: &[usize], output: usize) -> Self {
        let widths: Vec<usize> = std::iter::once(input)
            .chain(hidden.iter().copied())
            .chain(std::iter::once(output))
            .collect();

        let last = widths.len() - 2;
        let dense = widths.windows(2).enumerate().map(|(i, w)| {
            let act_fn = (i < last).then(ActFn::relu);
            Layer::dense((w[0], w[1]), act_fn)
        });

        Self::new(dense.chain(std::iter::once(Layer::log_softmax())))
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn check_len(&self, what: &'static str, len: usize) -> Result<()> {
        let expected = self.size();
        if len != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got: len,
                expected,
            });
        }

        Ok(())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        let mut specs = Vec::new();
        let mut offset = 0;

        let dense = self.layers.iter().filter_map(|layer| match layer {
            Layer::Dense(dense) => Some(dense),
            _ => None,
        });

        for (i, dense) in dense.enumerate() {
            let (fan_in, fan_out) = Dense::dim(dense);
            let weight = ParamSpec {
                name: format!("fc{}.weight", i + 1),
                offset,
                kind: ParamKind::Weight { fan_in, fan_out },
            };
            offset += weight.len();

            let bias = ParamSpec {
                name: format!("fc{}.bias", i + 1),
                offset,
                kind: ParamKind::Bias { fan_in, fan_out },
            };
            offset += bias.len();

            specs.extend([weight, bias]);
        }

        specs
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len("model parameters", params.len())?;

        let mut out = x.to_owned();
        let mut offset = 0;

        for layer in self.layers.iter_mut() {
            let size = layer.size();
            out = layer.forward(&params[offset..offset + size], out.view())?;
            offset += size;
        }

        Ok(out)
    }

    fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Result<()> {
        self.check_len("model parameters", params.len())?;
        self.check_len("model gradient", grad.len())?;

        let mut end = params.len();

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::arch::loss::{LossFn, NllLoss};

    #[test]
    fn mlp_layout_matches_the_classifier() {
        let model = Sequential::mlp(784, &[120, 84], 10);

        assert_eq!(model.size(), 785 * 120 + 121 * 84 + 85 * 10);

        let specs = model.param_specs();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "fc1.weight",
                "fc1.bias",
                "fc2.weight",
                "fc2.bias",
                "fc3.weight",
                "fc3.bias"
            ]
        );
        assert_eq!(specs[0].shape(), vec![120, 784]);
        assert_eq!(specs[1].offset, 784 * 120);
        assert_eq!(specs[5].shape(), vec![10]);
        assert_eq!(specs.iter().map(ParamSpec::len).sum::<usize>(), model.size());
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut model = Sequential::mlp(4, &[3], 2);
        let mut params: Vec<f32> = (0..model.size())
            .map(|i| ((i * 7 % 11) as f32 - 5.) / 10.)
            .collect();
        let mut grad = vec![0.; model.size()];
        let x = ndarray::array![[0.2, -0.1, 0.4, 0.9], [1.0, 0.5, -0.3, 0.0]];
        let y = ndarray::array![[1., 0.], [0., 1.]];

        model
            .compute_gradient(&params, &mut grad, &NllLoss, x.view(), y.view())
            .unwrap();

        let eps = 1e-2;
        for i in 0..params.len() {
            let orig = params[i];
            let mut loss_at = |v: f32| {
                params[i] = v;
                let y_pred = model.forward(&params, x.view()).unwrap();
                NllLoss.loss(y_pred.view(), y.view())
            };
            let numeric = (loss_at(orig + eps) - loss_at(orig - eps)) / (2. * eps);
            params[i] = orig;

            assert!((numeric - grad[i]).abs() < 1e-2, "param {i}");
        }
    }

    #[test]
    fn outputs_are_log_probabilities() {
        let mut model = Sequential::mlp(3, &[5], 4);
        let params = vec![0.1; model.size()];
        let x = Array2::from_elem((2, 3), 0.5);

        let y = model.forward(&params, x.view()).unwrap();

        assert_eq!(y.dim(), (2, 4));
        for row in y.rows() {
            let total: f32 = row.iter().map(|v| v.exp()).sum();
            assert!((total - 1.).abs() < 1e-4);
        }
    }
}
