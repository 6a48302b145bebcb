use ndarray::prelude::*;

/// Row-wise `log_softmax`, turning logits into log probabilities.
#[derive(Clone, Debug, Default)]
pub struct LogSoftmax {
    y: Array2<f32>,
}

impl LogSoftmax {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut y = x.to_owned();

        for mut row in y.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let lse = max + row.mapv(|v| (v - max).exp()).sum().ln();
            row -= lse;
        }

        self.y = y.clone();
        y
    }

    /// `dx = d - softmax(x) * sum(d)`, row by row.
    pub fn backward(&mut self, d: Array2<f32>) -> Array2<f32> {
        let sums = d.sum_axis(Axis(1)).insert_axis(Axis(1));
        let softmax = self.y.mapv(f32::exp);
        d - &(softmax * &sums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_exponentiate_to_one() {
        let mut layer = LogSoftmax::new();
        let x = array![[1., 2., 3.], [1000., 1000., 1000.]];

        let y = layer.forward(x.view());

        for row in y.rows() {
            let total: f32 = row.iter().map(|v| v.exp()).sum();
            assert!((total - 1.).abs() < 1e-3);
        }
        assert!((y[[1, 0]] + 3f32.ln()).abs() < 1e-3);
    }

    #[test]
    fn backward_rows_sum_to_zero() {
        let mut layer = LogSoftmax::new();
        let x = array![[0.3, -1.2, 2.0], [1.0, 1.0, -4.0]];
        layer.forward(x.view());

        let dx = layer.backward(array![[1., 1., 1.], [0.5, -2., 3.]]);

        for row in dx.rows() {
            assert!(row.sum().abs() < 1e-5);
        }
        assert!(dx.iter().any(|v| v.abs() > 1e-2));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let x = array![[0.3, -1.2, 2.0]];
        let d = array![[0.7, -0.4, 1.1]];
        let eps = 1e-2;

        let mut layer = LogSoftmax::new();
        layer.forward(x.view());
        let dx = layer.backward(d.clone());

        for j in 0..3 {
            let mut plus = x.clone();
            plus[[0, j]] += eps;
            let mut minus = x.clone();
            minus[[0, j]] -= eps;

            let f = |x: &Array2<f32>| (LogSoftmax::new().forward(x.view()) * &d).sum();
            let numeric = (f(&plus) - f(&minus)) / (2. * eps);

            assert!((numeric - dx[[0, j]]).abs() < 1e-2);
        }
    }
}
