//! Dense layers and the indicator (one-hot) encoding used by the wide branch.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Layer activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Softmax,
}

/// Fully connected layer: `activation(x . kernel + bias)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub name: String,
    pub kernel: Array2<f64>,
    pub bias: Array1<f64>,
    pub activation: Activation,
}

/// Gradients of one dense layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseGrad {
    pub kernel: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseGrad {
    pub fn zeros_like(layer: &Dense) -> Self {
        Self {
            kernel: Array2::zeros(layer.kernel.raw_dim()),
            bias: Array1::zeros(layer.bias.len()),
        }
    }

    pub fn add_assign(&mut self, other: &DenseGrad) {
        self.kernel += &other.kernel;
        self.bias += &other.bias;
    }

    pub fn scale(&mut self, factor: f64) {
        self.kernel *= factor;
        self.bias *= factor;
    }
}

impl Dense {
    /// Glorot-uniform kernel, zero bias.
    pub fn new(name: &str, inputs: usize, units: usize, activation: Activation, rng: &mut impl Rng) -> Self {
        let limit = if inputs + units > 0 {
            (6.0 / (inputs + units) as f64).sqrt()
        } else {
            0.0
        };
        let kernel = Array2::from_shape_fn((inputs, units), |_| rng.gen_range(-limit..=limit));
        Self {
            name: name.to_string(),
            kernel,
            bias: Array1::zeros(units),
            activation,
        }
    }

    pub fn inputs(&self) -> usize {
        self.kernel.nrows()
    }

    pub fn units(&self) -> usize {
        self.kernel.ncols()
    }

    pub fn param_count(&self) -> usize {
        self.kernel.len() + self.bias.len()
    }

    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let z = x.dot(&self.kernel) + &self.bias;
        match self.activation {
            Activation::Linear => z,
            Activation::Softmax => softmax(z),
        }
    }

    /// Gradients given the layer input and the gradient w.r.t. the
    /// pre-activation output. Returns the gradient w.r.t. the input too.
    pub fn backward(&self, input: &Array2<f64>, delta: &Array2<f64>) -> (DenseGrad, Array2<f64>) {
        let grad = DenseGrad {
            kernel: input.t().dot(delta),
            bias: delta.sum_axis(Axis(0)),
        };
        let input_delta = delta.dot(&self.kernel.t());
        (grad, input_delta)
    }
}

/// Row-wise numerically stable softmax.
pub fn softmax(mut z: Array2<f64>) -> Array2<f64> {
    for mut row in z.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        }
    }
    z
}

/// One-hot encode ids into `num_buckets` columns. Ids outside
/// `[0, num_buckets)` take the default id 0.
pub fn indicator(ids: &Array1<i64>, num_buckets: usize) -> Array2<f64> {
    let mut out = Array2::zeros((ids.len(), num_buckets));
    if num_buckets == 0 {
        return out;
    }
    for (row, id) in ids.iter().enumerate() {
        let col = if *id >= 0 && (*id as usize) < num_buckets {
            *id as usize
        } else {
            0
        };
        out[[row, col]] = 1.0;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_dense_shapes() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let layer = Dense::new("dense", 3, 4, Activation::Linear, &mut rng);
        assert_eq!(layer.kernel.dim(), (3, 4));
        assert_eq!(layer.param_count(), 16);
        let out = layer.forward(&Array2::ones((2, 3)));
        assert_eq!(out.dim(), (2, 4));
    }

    #[test]
    fn test_glorot_limit() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let layer = Dense::new("dense", 10, 6, Activation::Linear, &mut rng);
        let limit = (6.0f64 / 16.0).sqrt();
        assert!(layer.kernel.iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let p = softmax(array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
        for row in p.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!((p[[1, 0]] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_indicator_defaults_out_of_range() {
        let onehot = indicator(&array![2, -1, 7], 3);
        assert_eq!(
            onehot,
            array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]
        );
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let layer = Dense::new("dense", 2, 2, Activation::Linear, &mut rng);
        let x = array![[0.5, -1.0]];
        // loss = sum(output), so d loss / d output = 1
        let delta = Array2::ones((1, 2));
        let (grad, _) = layer.backward(&x, &delta);

        let eps = 1e-6;
        let mut bumped = layer.clone();
        bumped.kernel[[0, 1]] += eps;
        let numeric = (bumped.forward(&x).sum() - layer.forward(&x).sum()) / eps;
        assert!((numeric - grad.kernel[[0, 1]]).abs() < 1e-6);
    }
}
