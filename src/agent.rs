use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tracing::info;

use crate::error::{AgentError, CaissaResult};
use crate::gym::Transition;
use crate::nn::{Mlp, NetworkConfig};
use crate::seed::SeedManager;

pub mod dqn;
pub mod metrics;
pub mod policy_gradient;

pub use dqn::DqnAgent;
pub use metrics::{AgentMetrics, EpisodeStats};
pub use policy_gradient::PolicyGradientAgent;

/// Learning-rule variants the training substrate treats uniformly.
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
pub enum AgentKind {
    #[default]
    Dqn,
    PolicyGradient,
    /// Aliases to [`AgentKind::PolicyGradient`] at construction.
    ActorCritic,
}

/// Scalar diagnostics of one policy update, consumed by the training
/// validator. Transient update failures surface as `Err` at the call site and
/// become validator issues instead of aborting the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdateResult {
    pub loss: f64,
    pub gradient_norm: f64,
    pub policy_entropy: f64,
    pub mean_q: Option<f64>,
    pub mean_target: Option<f64>,
}

/// Capability set every agent variant implements.
///
/// Learning entry points take `&mut self` and run only on the orchestrator
/// thread; concurrent self-play inference goes through an immutable
/// [`AgentSnapshot`] instead.
pub trait Agent: Send {
    fn kind(&self) -> AgentKind;

    fn state_size(&self) -> usize;

    fn action_size(&self) -> usize;

    /// Picks one action out of `valid_actions`. Never returns an action
    /// outside the mask.
    fn select_action(&mut self, state: &[f64], valid_actions: &[usize]) -> CaissaResult<usize>;

    /// Records one transition, updating episode bookkeeping. May trigger an
    /// internal policy update when the internal buffer reaches the configured
    /// batch size or the transition is terminal.
    fn learn(&mut self, transition: &Transition) -> CaissaResult<Option<PolicyUpdateResult>>;

    /// Flushes any buffered transitions through a policy update immediately.
    fn force_update(&mut self) -> CaissaResult<Option<PolicyUpdateResult>>;

    /// Q-value estimates for the given actions.
    fn get_q_values(&self, state: &[f64], actions: &[usize]) -> CaissaResult<Vec<(usize, f64)>>;

    /// Probability distribution over the given actions; non-negative and
    /// summing to one.
    fn get_action_probabilities(
        &self,
        state: &[f64],
        actions: &[usize],
    ) -> CaissaResult<Vec<(usize, f64)>>;

    fn save(&self, path: &Path) -> CaissaResult<()>;

    fn load(&mut self, path: &Path) -> CaissaResult<()>;

    /// Network weights alone, for the portable model-only checkpoint artifact.
    fn export_network(&self) -> CaissaResult<serde_json::Value>;

    fn import_network(&mut self, value: serde_json::Value) -> CaissaResult<()>;

    fn metrics(&self) -> AgentMetrics;

    /// Clears learning buffers and episode bookkeeping.
    fn reset(&mut self);

    fn exploration_rate(&self) -> f64;

    fn set_exploration_rate(&mut self, rate: f64);

    /// Closes the current episode without a terminal transition, attributing
    /// `reward` to it. Used by the orchestrator for step-limited games.
    fn complete_episode_manually(&mut self, reward: f64, termination: &str);

    /// Immutable parameter snapshot for concurrent-read inference.
    fn snapshot(&self) -> AgentSnapshot;
}

/// Frozen copy of an agent's parameters.
///
/// Snapshots are taken at the start of each self-play phase and shared across
/// game workers; inference is `&self` and thread-safe. The self-play opponent
/// is exactly such a snapshot rather than a second learning agent.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    kind: AgentKind,
    network: Mlp,
    exploration_rate: f64,
}

impl AgentSnapshot {
    pub fn new(kind: AgentKind, network: Mlp, exploration_rate: f64) -> Self {
        Self {
            kind,
            network,
            exploration_rate,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn network(&self) -> &Mlp {
        &self.network
    }

    /// Greedy/stochastic action selection against frozen parameters. The
    /// caller supplies its own generator, keyed per game by the seed manager.
    pub fn select_action(
        &self,
        state: &[f64],
        valid_actions: &[usize],
        rng: &mut rand::rngs::StdRng,
    ) -> CaissaResult<usize> {
        use rand::Rng;

        if valid_actions.is_empty() {
            return Err(AgentError::EmptyValidActions.into());
        }
        if state.len() != self.network.input_size() {
            return Err(AgentError::StateSizeMismatch {
                expected: self.network.input_size(),
                got: state.len(),
            }
            .into());
        }
        if rng.random_range(0.0..1.0) < self.exploration_rate {
            return Ok(valid_actions[rng.random_range(0..valid_actions.len())]);
        }
        let output = self.network.predict(state);
        match self.kind {
            AgentKind::Dqn => Ok(argmax_over(&output, valid_actions)),
            AgentKind::PolicyGradient | AgentKind::ActorCritic => {
                let probs = masked_softmax(&output, valid_actions);
                Ok(sample_from(&probs, valid_actions, rng))
            }
        }
    }
}

/// Builds an agent variant. Actor-critic transparently aliases to
/// policy-gradient, keeping the requested variant tag out of the construction
/// result.
pub fn make_agent(
    kind: AgentKind,
    network: NetworkConfig,
    batch_size: usize,
    exploration_rate: f64,
    seeds: &SeedManager,
) -> CaissaResult<Box<dyn Agent>> {
    match kind {
        AgentKind::Dqn => Ok(Box::new(DqnAgent::new(
            network,
            batch_size,
            exploration_rate,
            seeds,
        )?)),
        AgentKind::PolicyGradient => Ok(Box::new(PolicyGradientAgent::new(
            network,
            batch_size,
            exploration_rate,
            seeds,
        )?)),
        AgentKind::ActorCritic => {
            info!("actor-critic aliases to policy-gradient");
            Ok(Box::new(PolicyGradientAgent::new(
                network,
                batch_size,
                exploration_rate,
                seeds,
            )?))
        }
    }
}

// ============================================================================
// Shared selection math
// ============================================================================

pub(crate) fn argmax_over(output: &ndarray::Array1<f64>, valid_actions: &[usize]) -> usize {
    let mut best = valid_actions[0];
    let mut best_value = f64::NEG_INFINITY;
    for &action in valid_actions {
        let value = output[action];
        if value > best_value {
            best_value = value;
            best = action;
        }
    }
    best
}

/// Softmax restricted to the valid actions, in their given order.
pub(crate) fn masked_softmax(output: &ndarray::Array1<f64>, valid_actions: &[usize]) -> Vec<f64> {
    let max = valid_actions
        .iter()
        .map(|&a| output[a])
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = valid_actions
        .iter()
        .map(|&a| (output[a] - max).exp())
        .collect();
    let total: f64 = exps.iter().sum();
    if total > 0.0 && total.is_finite() {
        exps.into_iter().map(|e| e / total).collect()
    } else {
        vec![1.0 / valid_actions.len() as f64; valid_actions.len()]
    }
}

pub(crate) fn sample_from(
    probs: &[f64],
    valid_actions: &[usize],
    rng: &mut rand::rngs::StdRng,
) -> usize {
    use rand::Rng;

    let mut threshold = rng.random_range(0.0..1.0);
    for (&action, &p) in valid_actions.iter().zip(probs) {
        if threshold < p {
            return action;
        }
        threshold -= p;
    }
    valid_actions[valid_actions.len() - 1]
}

/// Shannon entropy of a distribution, in nats.
pub(crate) fn entropy(probs: &[f64]) -> f64 {
    -probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.ln())
        .sum::<f64>()
}
