use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::error::{CaissaResult, ConfigError};
use crate::gym::{AdjudicationConfig, RewardConfig};
use crate::nn::{Activation, NetworkConfig, OptimizerKind, WeightInit};
use crate::replay::{EvictionStrategy, SamplingStrategy};
use crate::selfplay::SelfPlayConfig;
use crate::train::OpponentStrategy;

/// Complete parameter surface of a training run.
///
/// Every field has a serde name matching the operator-facing parameter key;
/// runtime adjustment goes through [`TrainingConfig::set_parameter`], which
/// rejects unknown keys and re-validates ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // ========================================================================
    // Reproducibility
    // ========================================================================
    pub seed: Option<u64>,
    pub deterministic_mode: bool,

    // ========================================================================
    // Run length and training cadence
    // ========================================================================
    /// Training iterations (self-play → train → evaluate cycles).
    pub episodes: usize,
    pub max_steps_per_episode: usize,
    pub batch_size: usize,
    /// Batched updates drawn from the replay buffer per iteration.
    pub updates_per_iteration: usize,

    // ========================================================================
    // Agent and network
    // ========================================================================
    pub agent_kind: AgentKind,
    pub learning_rate: f64,
    pub exploration_rate: f64,
    pub hidden_layers: Vec<usize>,
    pub activation: Activation,
    pub optimizer: OptimizerKind,
    pub weight_init: WeightInit,

    // ========================================================================
    // Replay buffer
    // ========================================================================
    pub max_buffer_size: usize,
    pub replay_batch_size: usize,
    pub sampling_strategy: SamplingStrategy,
    pub experience_cleanup: EvictionStrategy,

    // ========================================================================
    // Checkpoints
    // ========================================================================
    pub checkpoint_interval: usize,
    pub max_checkpoints: usize,

    // ========================================================================
    // Rewards
    // ========================================================================
    pub win_reward: f64,
    pub loss_reward: f64,
    pub draw_reward: f64,
    pub enable_position_rewards: bool,
    pub step_limit_penalty: f64,
    pub treat_step_limit_as_draw_for_reporting: bool,

    // ========================================================================
    // Self-play and evaluation
    // ========================================================================
    pub games_per_iteration: usize,
    pub parallel_games: usize,
    pub max_steps_per_game: usize,
    pub evaluation_games: usize,
    pub opponent_strategy: OpponentStrategy,
    pub opponent_update_frequency: usize,
    pub adaptive_threshold: f64,

    // ========================================================================
    // Early stopping and reporting
    // ========================================================================
    pub early_stop_window: usize,
    pub early_stop_threshold: Option<f64>,
    pub progress_report_interval: usize,
    pub max_rollback_history: usize,

    pub name: Option<String>,
    pub description: Option<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: None,
            deterministic_mode: false,
            episodes: 1000,
            max_steps_per_episode: 200,
            batch_size: 64,
            updates_per_iteration: 8,
            agent_kind: AgentKind::Dqn,
            learning_rate: 0.001,
            exploration_rate: 0.1,
            hidden_layers: vec![512, 256, 128],
            activation: Activation::Relu,
            optimizer: OptimizerKind::Adam,
            weight_init: WeightInit::Xavier,
            max_buffer_size: 50_000,
            replay_batch_size: 32,
            sampling_strategy: SamplingStrategy::Uniform,
            experience_cleanup: EvictionStrategy::OldestFirst,
            checkpoint_interval: 1000,
            max_checkpoints: 20,
            win_reward: 1.0,
            loss_reward: -1.0,
            draw_reward: 0.0,
            enable_position_rewards: false,
            step_limit_penalty: -0.05,
            treat_step_limit_as_draw_for_reporting: true,
            games_per_iteration: 20,
            parallel_games: 4,
            max_steps_per_game: 200,
            evaluation_games: 4,
            opponent_strategy: OpponentStrategy::CopyMain,
            opponent_update_frequency: 5,
            adaptive_threshold: 0.7,
            early_stop_window: 10,
            early_stop_threshold: None,
            progress_report_interval: 100,
            max_rollback_history: 10,
            name: None,
            description: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> CaissaResult<()> {
        let positive = [
            ("episodes", self.episodes),
            ("max_steps_per_episode", self.max_steps_per_episode),
            ("batch_size", self.batch_size),
            ("updates_per_iteration", self.updates_per_iteration),
            ("max_buffer_size", self.max_buffer_size),
            ("replay_batch_size", self.replay_batch_size),
            ("checkpoint_interval", self.checkpoint_interval),
            ("max_checkpoints", self.max_checkpoints),
            ("games_per_iteration", self.games_per_iteration),
            ("max_steps_per_game", self.max_steps_per_game),
            ("evaluation_games", self.evaluation_games),
            ("opponent_update_frequency", self.opponent_update_frequency),
            ("early_stop_window", self.early_stop_window),
            ("progress_report_interval", self.progress_report_interval),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    parameter: name.to_string(),
                    msg: "must be positive".to_string(),
                }
                .into());
            }
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(out_of_range("learning_rate", "must be a positive finite number"));
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            return Err(out_of_range("exploration_rate", "must lie in [0, 1]"));
        }
        if !(1..=8).contains(&self.parallel_games) {
            return Err(out_of_range("parallel_games", "must lie in 1..=8"));
        }
        if self.hidden_layers.is_empty() || self.hidden_layers.iter().any(|&n| n == 0) {
            return Err(out_of_range("hidden_layers", "layer widths must be positive"));
        }
        if !(-1.0..=0.0).contains(&self.step_limit_penalty) {
            return Err(out_of_range("step_limit_penalty", "must lie in [-1, 0]"));
        }
        if !(0.0..=1.0).contains(&self.adaptive_threshold) {
            return Err(out_of_range("adaptive_threshold", "must lie in [0, 1]"));
        }
        for (name, value) in [
            ("win_reward", self.win_reward),
            ("loss_reward", self.loss_reward),
            ("draw_reward", self.draw_reward),
        ] {
            if !value.is_finite() {
                return Err(out_of_range(name, "must be finite"));
            }
        }
        Ok(())
    }

    /// All recognized parameter keys, in declaration order.
    pub fn known_parameters() -> Vec<String> {
        let value = serde_json::to_value(TrainingConfig::default())
            .expect("default config serializes");
        match value {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn parameter(&self, key: &str) -> Option<serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    /// Applies one runtime adjustment by key. Unknown keys and type or range
    /// violations come back as [`ConfigError`]; the config is untouched on any
    /// failure.
    pub fn set_parameter(&mut self, key: &str, value: serde_json::Value) -> CaissaResult<()> {
        let serde_json::Value::Object(mut map) =
            serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidType {
                parameter: key.to_string(),
                expected: e.to_string(),
            })?
        else {
            return Err(ConfigError::UnknownParameter(key.to_string()).into());
        };
        if !map.contains_key(key) {
            return Err(ConfigError::UnknownParameter(key.to_string()).into());
        }
        map.insert(key.to_string(), value);
        let candidate: TrainingConfig = serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| ConfigError::InvalidType {
                parameter: key.to_string(),
                expected: e.to_string(),
            })?;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Parameters that only take effect on the next `start`.
    pub fn requires_restart(key: &str) -> bool {
        matches!(
            key,
            "seed"
                | "deterministic_mode"
                | "agent_kind"
                | "hidden_layers"
                | "activation"
                | "optimizer"
                | "weight_init"
                | "parallel_games"
                | "max_buffer_size"
        )
    }

    // ========================================================================
    // Derived component configurations
    // ========================================================================

    pub fn network_config(&self, input_size: usize, output_size: usize) -> NetworkConfig {
        NetworkConfig {
            input_size,
            hidden_layers: self.hidden_layers.clone(),
            output_size,
            activation: self.activation,
            optimizer: self.optimizer,
            weight_init: self.weight_init,
            learning_rate: self.learning_rate,
        }
    }

    pub fn reward_config(&self) -> RewardConfig {
        RewardConfig {
            win_reward: self.win_reward,
            loss_reward: self.loss_reward,
            draw_reward: self.draw_reward,
            enable_position_rewards: self.enable_position_rewards,
            ..RewardConfig::default()
        }
    }

    pub fn adjudication_config(&self) -> AdjudicationConfig {
        AdjudicationConfig::default()
    }

    pub fn selfplay_config(&self) -> SelfPlayConfig {
        SelfPlayConfig {
            games_per_iteration: self.games_per_iteration,
            max_concurrent_games: self.parallel_games,
            max_steps_per_game: self.max_steps_per_game,
            alternate_colors: true,
            show_progress: false,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "agent={} net={} episodes={} batch={} lr={} exploration={} buffer={} games/iter={}x{} checkpoint_interval={}",
            self.agent_kind,
            self.hidden_layers.iter().join("x"),
            self.episodes,
            self.batch_size,
            self.learning_rate,
            self.exploration_rate,
            self.max_buffer_size,
            self.games_per_iteration,
            self.parallel_games,
            self.checkpoint_interval,
        )
    }
}

fn out_of_range(parameter: &str, msg: &str) -> crate::error::CaissaError {
    ConfigError::OutOfRange {
        parameter: parameter.to_string(),
        msg: msg.to_string(),
    }
    .into()
}
