//! Adam optimizer.

use crate::model::layers::{Dense, DenseGrad};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Adam with bias-corrected moment estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta_1: f64,
    pub beta_2: f64,
    pub epsilon: f64,
    #[serde(skip)]
    iterations: u64,
    #[serde(skip)]
    slots: Vec<Moments>,
}

#[derive(Debug, Clone)]
struct Moments {
    m_kernel: Array2<f64>,
    v_kernel: Array2<f64>,
    m_bias: Array1<f64>,
    v_bias: Array1<f64>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
            iterations: 0,
            slots: Vec::new(),
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Apply one update to `layers` in place. `grads[i]` belongs to `layers[i]`.
    pub fn apply_gradients(&mut self, layers: &mut [&mut Dense], grads: &[DenseGrad]) {
        if self.slots.len() != layers.len() {
            self.slots = layers
                .iter()
                .map(|l| Moments {
                    m_kernel: Array2::zeros(l.kernel.raw_dim()),
                    v_kernel: Array2::zeros(l.kernel.raw_dim()),
                    m_bias: Array1::zeros(l.bias.len()),
                    v_bias: Array1::zeros(l.bias.len()),
                })
                .collect();
        }

        self.iterations += 1;
        let t = self.iterations as i32;
        let lr_t = self.learning_rate * (1.0 - self.beta_2.powi(t)).sqrt()
            / (1.0 - self.beta_1.powi(t));
        let (b1, b2, eps) = (self.beta_1, self.beta_2, self.epsilon);

        for ((layer, grad), slot) in layers.iter_mut().zip(grads).zip(&mut self.slots) {
            slot.m_kernel = &slot.m_kernel * b1 + &grad.kernel * (1.0 - b1);
            slot.v_kernel = &slot.v_kernel * b2 + &grad.kernel.mapv(|g| g * g) * (1.0 - b2);
            layer.kernel -= &(&slot.m_kernel / &slot.v_kernel.mapv(|v| v.sqrt() + eps) * lr_t);

            slot.m_bias = &slot.m_bias * b1 + &grad.bias * (1.0 - b1);
            slot.v_bias = &slot.v_bias * b2 + &grad.bias.mapv(|g| g * g) * (1.0 - b2);
            layer.bias -= &(&slot.m_bias / &slot.v_bias.mapv(|v| v.sqrt() + eps) * lr_t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::layers::Activation;
    use ndarray::array;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut layer = Dense {
            name: "d".into(),
            kernel: array![[1.0]],
            bias: array![0.0],
            activation: Activation::Linear,
        };
        let grad = DenseGrad {
            kernel: array![[0.5]],
            bias: array![-2.0],
        };
        let mut adam = Adam::new(0.1);
        adam.apply_gradients(&mut [&mut layer], &[grad]);

        // First bias-corrected Adam step has magnitude ~lr regardless of grad scale.
        assert!((layer.kernel[[0, 0]] - 0.9).abs() < 1e-5);
        assert!((layer.bias[0] - 0.1).abs() < 1e-5);
        assert_eq!(adam.iterations(), 1);
    }

    #[test]
    fn test_zero_gradient_is_noop() {
        let mut layer = Dense {
            name: "d".into(),
            kernel: array![[1.0, 2.0]],
            bias: array![0.5, 0.5],
            activation: Activation::Linear,
        };
        let before = layer.clone();
        let grad = DenseGrad::zeros_like(&layer);
        Adam::new(0.01).apply_gradients(&mut [&mut layer], &[grad]);
        assert_eq!(layer, before);
    }
}
