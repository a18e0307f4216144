use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{CaissaResult, EnvError};

pub mod init;
pub mod network;
pub mod optimizer;

pub use network::Mlp;
pub use optimizer::Optimizer;

/// Activation applied to hidden layers. The output layer is always linear so
/// that the same network can emit unbounded Q-values or raw policy logits.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Sigmoid,
    Tanh,
    Linear,
}

impl Activation {
    pub(crate) fn apply(&self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Linear => x,
        }
    }

    /// Derivative expressed in terms of the activation output `y = f(x)`.
    pub(crate) fn derivative(&self, y: f64) -> f64 {
        match self {
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
            Activation::Linear => 1.0,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    #[default]
    Adam,
    #[serde(rename = "rmsprop")]
    #[strum(serialize = "rmsprop")]
    RmsProp,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WeightInit {
    #[default]
    Xavier,
    He,
    Uniform,
    Zero,
}

/// Blueprint for building an [`Mlp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub input_size: usize,
    pub hidden_layers: Vec<usize>,
    pub output_size: usize,
    pub activation: Activation,
    pub optimizer: OptimizerKind,
    pub weight_init: WeightInit,
    pub learning_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: 1,
            hidden_layers: vec![512, 256, 128],
            output_size: 1,
            activation: Activation::default(),
            optimizer: OptimizerKind::default(),
            weight_init: WeightInit::default(),
            learning_rate: 0.001,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> CaissaResult<()> {
        if self.input_size == 0 || self.output_size == 0 {
            return Err(
                EnvError::InvalidConfig("network input/output sizes must be positive".into())
                    .into(),
            );
        }
        if self.hidden_layers.iter().any(|&n| n == 0) {
            return Err(EnvError::InvalidConfig("hidden layer width of zero".into()).into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(EnvError::InvalidConfig("learning rate must be positive".into()).into());
        }
        Ok(())
    }

    /// Layer dimensions as `(fan_in, fan_out)` pairs, input to output.
    pub(crate) fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut sizes = Vec::with_capacity(self.hidden_layers.len() + 2);
        sizes.push(self.input_size);
        sizes.extend_from_slice(&self.hidden_layers);
        sizes.push(self.output_size);
        sizes.windows(2).map(|w| (w[0], w[1])).collect()
    }
}
