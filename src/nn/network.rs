use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::{CaissaResult, IoError, SystemError};
use crate::nn::{Activation, NetworkConfig, Optimizer, init};

/// Fully connected network with a linear output layer.
///
/// `predict` is pure and shares the network across threads; `train_step`
/// mutates weights and is confined to the training phase.
#[derive(Debug, Clone)]
pub struct Mlp {
    config: NetworkConfig,
    layers: Vec<Dense>,
}

#[derive(Debug, Clone)]
struct Dense {
    weights: Array2<f64>,
    biases: Array1<f64>,
    activation: Activation,
    optimizer: Optimizer,
}

impl Mlp {
    pub fn new(config: NetworkConfig, rng: &mut StdRng) -> CaissaResult<Mlp> {
        config.validate()?;
        let dims = config.layer_dims();
        let last = dims.len() - 1;
        let layers = dims
            .into_iter()
            .enumerate()
            .map(|(i, (fan_in, fan_out))| Dense {
                weights: init::init_weights(config.weight_init, fan_in, fan_out, rng),
                biases: init::init_biases(fan_out),
                activation: if i == last {
                    Activation::Linear
                } else {
                    config.activation
                },
                optimizer: Optimizer::new(config.optimizer),
            })
            .collect();
        Ok(Mlp { config, layers })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn input_size(&self) -> usize {
        self.config.input_size
    }

    pub fn output_size(&self) -> usize {
        self.config.output_size
    }

    /// Forward pass without any training bookkeeping.
    pub fn predict(&self, input: &[f64]) -> Array1<f64> {
        let mut activation = Array1::from_vec(input.to_vec());
        for layer in &self.layers {
            activation = layer.forward(&activation);
        }
        activation
    }

    /// One gradient step toward `target` under the MSE loss.
    ///
    /// Returns `(loss, gradient_norm)` where the norm is the global L2 norm
    /// over all weight and bias gradients before the optimizer update.
    pub fn train_step(&mut self, input: &[f64], target: &[f64]) -> CaissaResult<(f64, f64)> {
        let output = self.forward_cached(input);
        let diff = &output.activations[output.activations.len() - 1]
            - &Array1::from_vec(target.to_vec());
        let loss = diff.mapv(|d| d * d).mean().unwrap_or(0.0);
        let grad_norm = self.backward(&output, diff)?;
        Ok((loss, grad_norm))
    }

    /// One gradient step with an externally supplied output-layer gradient,
    /// used by policy-gradient losses that are not plain MSE.
    pub fn train_step_with_output_grad(
        &mut self,
        input: &[f64],
        output_grad: &[f64],
    ) -> CaissaResult<f64> {
        let output = self.forward_cached(input);
        self.backward(&output, Array1::from_vec(output_grad.to_vec()))
    }

    fn forward_cached(&self, input: &[f64]) -> ForwardPass {
        let mut activations = vec![Array1::from_vec(input.to_vec())];
        for layer in &self.layers {
            let next = layer.forward(activations.last().expect("non-empty activations"));
            activations.push(next);
        }
        ForwardPass { activations }
    }

    /// Backpropagates `output_delta` and applies the optimizer. Returns the
    /// global gradient norm.
    fn backward(&mut self, pass: &ForwardPass, output_delta: Array1<f64>) -> CaissaResult<f64> {
        if pass.activations.len() != self.layers.len() + 1 {
            return Err(SystemError::InvariantViolation(
                "forward pass cache does not match layer count".into(),
            )
            .into());
        }
        let learning_rate = self.config.learning_rate;
        let mut delta = output_delta;
        let mut squared_norm = 0.0;
        for (index, layer) in self.layers.iter_mut().enumerate().rev() {
            let layer_output = &pass.activations[index + 1];
            let layer_input = &pass.activations[index];

            // Fold the activation derivative into the incoming delta.
            for (d, &y) in delta.iter_mut().zip(layer_output.iter()) {
                *d *= layer.activation.derivative(y);
            }

            let grad_w = outer(&delta, layer_input);
            let grad_b = delta.clone();
            squared_norm += grad_w.mapv(|g| g * g).sum() + grad_b.mapv(|g| g * g).sum();

            // Delta for the previous layer, computed before the weights move.
            let prev_delta = layer.weights.t().dot(&delta);

            layer.optimizer.update(
                &mut layer.weights,
                &mut layer.biases,
                &grad_w,
                &grad_b,
                learning_rate,
            );
            delta = prev_delta;
        }
        Ok(squared_norm.sqrt())
    }

    // ============================================================================
    // Persistence
    // ============================================================================

    pub fn save(&self, path: &Path) -> CaissaResult<()> {
        let payload = MlpPayload::from(self);
        let json = serde_json::to_string(&payload).map_err(IoError::from)?;
        fs::write(path, json).map_err(IoError::from)?;
        Ok(())
    }

    pub fn load(path: &Path) -> CaissaResult<Mlp> {
        let json = fs::read_to_string(path).map_err(IoError::from)?;
        let payload: MlpPayload = serde_json::from_str(&json).map_err(IoError::from)?;
        payload.try_into()
    }

    /// Serializes the weights into a JSON value, for embedding in larger
    /// checkpoint payloads.
    pub fn to_json_value(&self) -> CaissaResult<serde_json::Value> {
        serde_json::to_value(MlpPayload::from(self))
            .map_err(|e| IoError::from(e).into())
    }

    pub fn from_json_value(value: serde_json::Value) -> CaissaResult<Mlp> {
        let payload: MlpPayload = serde_json::from_value(value).map_err(IoError::from)?;
        payload.try_into()
    }
}

impl Dense {
    fn forward(&self, input: &Array1<f64>) -> Array1<f64> {
        let mut z = self.weights.dot(input) + &self.biases;
        z.mapv_inplace(|x| self.activation.apply(x));
        z
    }
}

fn outer(column: &Array1<f64>, row: &Array1<f64>) -> Array2<f64> {
    let mut result = Array2::zeros((column.len(), row.len()));
    for (i, &c) in column.iter().enumerate() {
        for (j, &r) in row.iter().enumerate() {
            result[[i, j]] = c * r;
        }
    }
    result
}

struct ForwardPass {
    /// Input activation followed by each layer's output, length `layers + 1`.
    activations: Vec<Array1<f64>>,
}

// ============================================================================
// Serialized form
// ============================================================================

#[derive(Serialize, Deserialize)]
struct MlpPayload {
    config: NetworkConfig,
    layers: Vec<DensePayload>,
}

#[derive(Serialize, Deserialize)]
struct DensePayload {
    rows: usize,
    cols: usize,
    weights: Vec<f64>,
    biases: Vec<f64>,
    activation: Activation,
    optimizer: Optimizer,
}

impl From<&Mlp> for MlpPayload {
    fn from(mlp: &Mlp) -> Self {
        let layers = mlp
            .layers
            .iter()
            .map(|layer| DensePayload {
                rows: layer.weights.nrows(),
                cols: layer.weights.ncols(),
                weights: layer.weights.iter().copied().collect(),
                biases: layer.biases.to_vec(),
                activation: layer.activation,
                optimizer: layer.optimizer.clone(),
            })
            .collect();
        MlpPayload {
            config: mlp.config.clone(),
            layers,
        }
    }
}

impl TryFrom<MlpPayload> for Mlp {
    type Error = crate::error::CaissaError;

    fn try_from(payload: MlpPayload) -> CaissaResult<Mlp> {
        let layers = payload
            .layers
            .into_iter()
            .map(|layer| {
                let weights = Array2::from_shape_vec((layer.rows, layer.cols), layer.weights)
                    .map_err(|e| {
                        SystemError::InvariantViolation(format!("weight shape mismatch: {e}"))
                    })?;
                Ok(Dense {
                    weights,
                    biases: Array1::from_vec(layer.biases),
                    activation: layer.activation,
                    optimizer: layer.optimizer,
                })
            })
            .collect::<Result<Vec<_>, SystemError>>()?;
        Ok(Mlp {
            config: payload.config,
            layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn small_config() -> NetworkConfig {
        NetworkConfig {
            input_size: 3,
            hidden_layers: vec![8],
            output_size: 2,
            learning_rate: 0.05,
            ..NetworkConfig::default()
        }
    }

    fn small_mlp(seed: u64) -> Mlp {
        let mut rng = StdRng::seed_from_u64(seed);
        Mlp::new(small_config(), &mut rng).unwrap()
    }

    #[test]
    fn predict_has_output_shape() {
        let mlp = small_mlp(1);
        assert_eq!(mlp.predict(&[0.1, 0.2, 0.3]).len(), 2);
    }

    #[test]
    fn same_seed_same_predictions() {
        let a = small_mlp(42);
        let b = small_mlp(42);
        assert_eq!(a.predict(&[1.0, -1.0, 0.5]), b.predict(&[1.0, -1.0, 0.5]));
    }

    #[test]
    fn training_reduces_mse_loss() {
        let mut mlp = small_mlp(3);
        let input = [0.5, -0.25, 1.0];
        let target = [1.0, -1.0];
        let (first_loss, grad_norm) = mlp.train_step(&input, &target).unwrap();
        assert!(grad_norm > 0.0);
        let mut last_loss = first_loss;
        for _ in 0..200 {
            (last_loss, _) = mlp.train_step(&input, &target).unwrap();
        }
        assert!(last_loss < first_loss);
    }

    #[test]
    fn save_load_round_trips_predictions() {
        let dir = std::env::temp_dir().join(format!("caissa-mlp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("net.json");

        let mlp = small_mlp(9);
        mlp.save(&path).unwrap();
        let restored = Mlp::load(&path).unwrap();
        let probe = [0.25, 0.5, -0.75];
        assert_eq!(mlp.predict(&probe), restored.predict(&probe));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn json_value_round_trip() {
        let mlp = small_mlp(11);
        let value = mlp.to_json_value().unwrap();
        let restored = Mlp::from_json_value(value).unwrap();
        assert_eq!(mlp.predict(&[0.0, 0.0, 0.0]), restored.predict(&[0.0, 0.0, 0.0]));
    }
}
