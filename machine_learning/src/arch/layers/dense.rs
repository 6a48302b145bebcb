use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer computing `act(x·W + b)`.
///
/// The layer owns no parameters, it views a slice of `(in + 1) * out` values laid out as the
/// weights, row major with shape `(in, out)`, followed by the `out` biases.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output widths.
    /// * `act_fn` - The activation applied to the output, if any.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: Array2::zeros((0, dim.0)),
            z: Array2::zeros((0, dim.1)),
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the input and output widths of this layer.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = x.dot(&w);
        z += &b;

        self.x = x.to_owned();

        let Some(act_fn) = &self.act_fn else {
            self.z = z.clone();
            return Ok(z);
        };

        let mut a = z.clone();
        a.par_mapv_inplace(|v| act_fn.f(v));
        self.z = z;
        Ok(a)
    }

    /// Propagates `d`, the derivative of the loss with respect to this layer's output, writing
    /// this layer's gradient into `grad` and returning the derivative with respect to its input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != self.z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense delta",
                got: d.len(),
                expected: self.z.len(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    fn check_len(&self, what: &'static str, len: usize) -> Result<()> {
        if len != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got: len,
                expected: self.size,
            });
        }

        Ok(())
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense gradient", grad.len())?;
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense parameters", params.len())?;
        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_computes_affine_map() {
        let mut dense = Dense::new((2, 3), None);
        // W = [[1, 2, 3], [4, 5, 6]], b = [0.5, 0.5, 0.5]
        let params = [1., 2., 3., 4., 5., 6., 0.5, 0.5, 0.5];
        let x = array![[1., 1.], [0., 2.]];

        let y = dense.forward(&params, x.view()).unwrap();

        assert_eq!(y, array![[5.5, 7.5, 9.5], [8.5, 10.5, 12.5]]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut dense = Dense::new((3, 2), Some(ActFn::sigmoid(1.)));
        let mut params = vec![0.1, -0.2, 0.3, 0.05, -0.4, 0.25, 0.01, -0.02];
        let x = array![[0.5, -1.0, 2.0]];
        let mut grad = vec![0.; dense.size()];

        // loss = sum(output)
        let y = dense.forward(&params, x.view()).unwrap();
        let d = Array2::ones(y.dim());
        dense.backward(&params, &mut grad, d).unwrap();

        let eps = 1e-3;
        for i in 0..params.len() {
            let orig = params[i];
            params[i] = orig + eps;
            let up = dense.forward(&params, x.view()).unwrap().sum();
            params[i] = orig - eps;
            let down = dense.forward(&params, x.view()).unwrap().sum();
            params[i] = orig;

            let numeric = (up - down) / (2. * eps);
            assert!((numeric - grad[i]).abs() < 1e-3, "param {i}");
        }
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let mut dense = Dense::new((2, 2), None);
        let x = array![[1., 1.]];

        let err = dense.forward(&[0.; 5], x.view()).unwrap_err();

        assert!(matches!(
            err,
            MlErr::SizeMismatch {
                got: 5,
                expected: 6,
                ..
            }
        ));
    }
}
