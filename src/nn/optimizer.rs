use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::nn::OptimizerKind;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const RMSPROP_DECAY: f64 = 0.9;
const EPSILON: f64 = 1e-8;

/// Per-layer optimizer state. One instance exists for each dense layer; the
/// step counter for Adam bias correction is shared across parameters of the
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Optimizer {
    Sgd,
    Adam {
        step: u64,
        #[serde(skip)]
        moments: Option<AdamMoments>,
    },
    RmsProp {
        #[serde(skip)]
        cache: Option<RmsCache>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct AdamMoments {
    pub m_w: Array2<f64>,
    pub v_w: Array2<f64>,
    pub m_b: Array1<f64>,
    pub v_b: Array1<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RmsCache {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind) -> Self {
        match kind {
            OptimizerKind::Sgd => Optimizer::Sgd,
            OptimizerKind::Adam => Optimizer::Adam {
                step: 0,
                moments: None,
            },
            OptimizerKind::RmsProp => Optimizer::RmsProp { cache: None },
        }
    }

    /// Applies one update in place given raw gradients.
    pub fn update(
        &mut self,
        weights: &mut Array2<f64>,
        biases: &mut Array1<f64>,
        grad_w: &Array2<f64>,
        grad_b: &Array1<f64>,
        learning_rate: f64,
    ) {
        match self {
            Optimizer::Sgd => {
                *weights -= &(grad_w * learning_rate);
                *biases -= &(grad_b * learning_rate);
            }
            Optimizer::Adam { step, moments } => {
                let state = moments.get_or_insert_with(|| AdamMoments {
                    m_w: Array2::zeros(weights.raw_dim()),
                    v_w: Array2::zeros(weights.raw_dim()),
                    m_b: Array1::zeros(biases.raw_dim()),
                    v_b: Array1::zeros(biases.raw_dim()),
                });
                *step += 1;
                let t = *step as i32;
                let bias1 = 1.0 - ADAM_BETA1.powi(t);
                let bias2 = 1.0 - ADAM_BETA2.powi(t);

                state.m_w = &state.m_w * ADAM_BETA1 + grad_w * (1.0 - ADAM_BETA1);
                state.v_w = &state.v_w * ADAM_BETA2 + &grad_w.mapv(|g| g * g) * (1.0 - ADAM_BETA2);
                state.m_b = &state.m_b * ADAM_BETA1 + grad_b * (1.0 - ADAM_BETA1);
                state.v_b = &state.v_b * ADAM_BETA2 + &grad_b.mapv(|g| g * g) * (1.0 - ADAM_BETA2);

                ndarray::Zip::from(weights)
                    .and(&state.m_w)
                    .and(&state.v_w)
                    .for_each(|w, &m, &v| {
                        *w -= learning_rate * (m / bias1) / ((v / bias2).sqrt() + EPSILON);
                    });
                ndarray::Zip::from(biases)
                    .and(&state.m_b)
                    .and(&state.v_b)
                    .for_each(|b, &m, &v| {
                        *b -= learning_rate * (m / bias1) / ((v / bias2).sqrt() + EPSILON);
                    });
            }
            Optimizer::RmsProp { cache } => {
                let state = cache.get_or_insert_with(|| RmsCache {
                    w: Array2::zeros(weights.raw_dim()),
                    b: Array1::zeros(biases.raw_dim()),
                });
                state.w = &state.w * RMSPROP_DECAY + &grad_w.mapv(|g| g * g) * (1.0 - RMSPROP_DECAY);
                state.b = &state.b * RMSPROP_DECAY + &grad_b.mapv(|g| g * g) * (1.0 - RMSPROP_DECAY);

                ndarray::Zip::from(weights)
                    .and(grad_w)
                    .and(&state.w)
                    .for_each(|w, &g, &c| {
                        *w -= learning_rate * g / (c.sqrt() + EPSILON);
                    });
                ndarray::Zip::from(biases)
                    .and(grad_b)
                    .and(&state.b)
                    .for_each(|b, &g, &c| {
                        *b -= learning_rate * g / (c.sqrt() + EPSILON);
                    });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn one_step(kind: OptimizerKind) -> (Array2<f64>, Array1<f64>) {
        let mut opt = Optimizer::new(kind);
        let mut w = array![[1.0, 1.0], [1.0, 1.0]];
        let mut b = array![0.5, 0.5];
        let gw = array![[0.1, -0.1], [0.2, 0.0]];
        let gb = array![0.1, -0.1];
        opt.update(&mut w, &mut b, &gw, &gb, 0.1);
        (w, b)
    }

    #[test]
    fn sgd_moves_against_gradient() {
        let (w, b) = one_step(OptimizerKind::Sgd);
        assert!((w[[0, 0]] - 0.99).abs() < 1e-12);
        assert!((w[[0, 1]] - 1.01).abs() < 1e-12);
        assert!((b[[0]] - 0.49).abs() < 1e-12);
    }

    #[test]
    fn adam_first_step_is_bounded_by_learning_rate() {
        let (w, _) = one_step(OptimizerKind::Adam);
        // With bias correction the first Adam step is approximately -lr * sign(g).
        assert!((w[[0, 0]] - 0.9).abs() < 1e-3);
        assert!((w[[0, 1]] - 1.1).abs() < 1e-3);
        assert!((w[[1, 1]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rmsprop_scales_by_running_variance() {
        let (w, _) = one_step(OptimizerKind::RmsProp);
        assert!(w[[0, 0]] < 1.0);
        assert!(w[[0, 1]] > 1.0);
        assert_eq!(w[[1, 1]], 1.0);
    }
}
