use ndarray::{Array1, Array2};
use rand::Rng;
use rand::rngs::StdRng;

use crate::nn::WeightInit;

/// Builds a weight matrix of shape `(fan_out, fan_in)` for one dense layer.
///
/// All schemes draw exclusively from the provided generator so that network
/// construction is bit-reproducible for a fixed seed stream. He and Xavier use
/// their uniform variants to keep the draw count per weight at exactly one.
pub fn init_weights(
    scheme: WeightInit,
    fan_in: usize,
    fan_out: usize,
    rng: &mut StdRng,
) -> Array2<f64> {
    let limit = match scheme {
        WeightInit::Xavier => (6.0 / (fan_in + fan_out) as f64).sqrt(),
        WeightInit::He => (6.0 / fan_in as f64).sqrt(),
        WeightInit::Uniform => 0.05,
        WeightInit::Zero => {
            return Array2::zeros((fan_out, fan_in));
        }
    };
    let mut weights = Array2::zeros((fan_out, fan_in));
    for value in weights.iter_mut() {
        *value = rng.random_range(-limit..limit);
    }
    weights
}

/// Biases start at zero for every scheme.
pub fn init_biases(fan_out: usize) -> Array1<f64> {
    Array1::zeros(fan_out)
}
