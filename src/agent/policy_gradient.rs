use std::fs;
use std::path::Path;

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::agent::metrics::{AgentMetrics, EpisodeStats};
use crate::agent::{
    Agent, AgentKind, AgentSnapshot, PolicyUpdateResult, entropy, masked_softmax, sample_from,
};
use crate::error::{AgentError, CaissaResult, IoError};
use crate::gym::Transition;
use crate::nn::{Mlp, NetworkConfig};
use crate::seed::SeedManager;

const DEFAULT_GAMMA: f64 = 0.99;

/// REINFORCE agent with a reward-to-go baseline.
///
/// The network emits raw logits over the full action space; selection samples
/// from the masked softmax. Updates run over the buffered trajectory segment
/// whenever an episode ends or the segment reaches the batch size.
pub struct PolicyGradientAgent {
    policy_net: Mlp,
    batch_size: usize,
    exploration_rate: f64,
    gamma: f64,
    trajectory: Vec<Transition>,
    stats: EpisodeStats,
    rng: StdRng,
    update_count: u64,
}

impl PolicyGradientAgent {
    pub fn new(
        network: NetworkConfig,
        batch_size: usize,
        exploration_rate: f64,
        seeds: &SeedManager,
    ) -> CaissaResult<Self> {
        let mut init_rng = seeds.stream("neural_network")?;
        let policy_net = Mlp::new(network, &mut init_rng)?;
        Ok(Self {
            policy_net,
            batch_size: batch_size.max(1),
            exploration_rate,
            gamma: DEFAULT_GAMMA,
            trajectory: Vec::new(),
            stats: EpisodeStats::new(),
            rng: seeds.stream("exploration")?,
            update_count: 0,
        })
    }

    fn check_state(&self, state: &[f64]) -> CaissaResult<()> {
        if state.len() != self.policy_net.input_size() {
            return Err(AgentError::StateSizeMismatch {
                expected: self.policy_net.input_size(),
                got: state.len(),
            }
            .into());
        }
        Ok(())
    }

    /// One REINFORCE update over the buffered trajectory segment.
    fn update(&mut self) -> CaissaResult<PolicyUpdateResult> {
        let segment = std::mem::take(&mut self.trajectory);
        let count = segment.len() as f64;

        // Discounted reward-to-go, then a mean baseline.
        let mut returns = vec![0.0; segment.len()];
        let mut running = 0.0;
        for (i, transition) in segment.iter().enumerate().rev() {
            running = transition.reward + self.gamma * running;
            if transition.done {
                running = transition.reward;
            }
            returns[i] = running;
        }
        let baseline = returns.iter().sum::<f64>() / count;

        let action_count = self.policy_net.output_size();
        let all_actions: Vec<usize> = (0..action_count).collect();
        let mut total_loss = 0.0;
        let mut total_grad = 0.0;
        let mut total_entropy = 0.0;

        for (transition, g) in segment.iter().zip(&returns) {
            let advantage = g - baseline;
            let logits = self.policy_net.predict(&transition.state);
            let probs = masked_softmax(&logits, &all_actions);
            total_entropy += entropy(&probs);
            let p_action = probs[transition.action].max(f64::MIN_POSITIVE);
            total_loss += -advantage * p_action.ln();

            // d(-adv * log p(a)) / dlogits = adv * (p - onehot(a))
            let mut grad: Vec<f64> = probs.iter().map(|&p| advantage * p).collect();
            grad[transition.action] -= advantage;
            if grad.iter().any(|g| !g.is_finite()) {
                return Err(AgentError::UpdateFailed("non-finite policy gradient".into()).into());
            }
            total_grad += self
                .policy_net
                .train_step_with_output_grad(&transition.state, &grad)?;
        }

        self.update_count += 1;
        Ok(PolicyUpdateResult {
            loss: total_loss / count,
            gradient_norm: total_grad / count,
            policy_entropy: total_entropy / count,
            mean_q: None,
            mean_target: None,
        })
    }
}

impl Agent for PolicyGradientAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::PolicyGradient
    }

    fn state_size(&self) -> usize {
        self.policy_net.input_size()
    }

    fn action_size(&self) -> usize {
        self.policy_net.output_size()
    }

    fn select_action(&mut self, state: &[f64], valid_actions: &[usize]) -> CaissaResult<usize> {
        if valid_actions.is_empty() {
            return Err(AgentError::EmptyValidActions.into());
        }
        self.check_state(state)?;
        if self.rng.random_range(0.0..1.0) < self.exploration_rate {
            return Ok(valid_actions[self.rng.random_range(0..valid_actions.len())]);
        }
        let probs = masked_softmax(&self.policy_net.predict(state), valid_actions);
        Ok(sample_from(&probs, valid_actions, &mut self.rng))
    }

    fn learn(&mut self, transition: &Transition) -> CaissaResult<Option<PolicyUpdateResult>> {
        self.check_state(&transition.state)?;
        self.check_state(&transition.next_state)?;
        if transition.action >= self.action_size() {
            return Err(AgentError::InvalidInput(format!(
                "action {} outside action space",
                transition.action
            ))
            .into());
        }
        self.stats.record_step(transition.reward);
        self.trajectory.push(transition.clone());
        if transition.done {
            let label = if transition.reward > 0.0 {
                "win"
            } else if transition.reward < 0.0 {
                "loss"
            } else {
                "draw"
            };
            self.stats.complete_episode(label);
        }
        if transition.done || self.trajectory.len() >= self.batch_size {
            return self.update().map(Some);
        }
        Ok(None)
    }

    fn force_update(&mut self) -> CaissaResult<Option<PolicyUpdateResult>> {
        if self.trajectory.is_empty() {
            return Ok(None);
        }
        self.update().map(Some)
    }

    fn get_q_values(&self, state: &[f64], actions: &[usize]) -> CaissaResult<Vec<(usize, f64)>> {
        self.check_state(state)?;
        // Logits stand in for action values in the policy-gradient variant.
        let output = self.policy_net.predict(state);
        Ok(actions.iter().map(|&a| (a, output[a])).collect())
    }

    fn get_action_probabilities(
        &self,
        state: &[f64],
        actions: &[usize],
    ) -> CaissaResult<Vec<(usize, f64)>> {
        if actions.is_empty() {
            return Err(AgentError::EmptyValidActions.into());
        }
        self.check_state(state)?;
        let probs = masked_softmax(&self.policy_net.predict(state), actions);
        Ok(actions.iter().copied().zip(probs).collect())
    }

    fn save(&self, path: &Path) -> CaissaResult<()> {
        let payload = PolicyGradientPayload {
            kind: AgentKind::PolicyGradient,
            policy_net: self.policy_net.to_json_value()?,
            batch_size: self.batch_size,
            exploration_rate: self.exploration_rate,
            gamma: self.gamma,
            update_count: self.update_count,
            stats: self.stats.clone(),
        };
        let json = serde_json::to_string(&payload).map_err(IoError::from)?;
        fs::write(path, json).map_err(IoError::from)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> CaissaResult<()> {
        let json = fs::read_to_string(path).map_err(IoError::from)?;
        let payload: PolicyGradientPayload =
            serde_json::from_str(&json).map_err(IoError::from)?;
        self.policy_net = Mlp::from_json_value(payload.policy_net)?;
        self.batch_size = payload.batch_size;
        self.exploration_rate = payload.exploration_rate;
        self.gamma = payload.gamma;
        self.update_count = payload.update_count;
        self.stats = payload.stats;
        self.trajectory.clear();
        Ok(())
    }

    fn export_network(&self) -> CaissaResult<serde_json::Value> {
        self.policy_net.to_json_value()
    }

    fn import_network(&mut self, value: serde_json::Value) -> CaissaResult<()> {
        self.policy_net = Mlp::from_json_value(value)?;
        Ok(())
    }

    fn metrics(&self) -> AgentMetrics {
        self.stats
            .metrics(self.exploration_rate, self.trajectory.len())
    }

    fn reset(&mut self) {
        self.trajectory.clear();
        self.stats.reset();
        self.update_count = 0;
    }

    fn exploration_rate(&self) -> f64 {
        self.exploration_rate
    }

    fn set_exploration_rate(&mut self, rate: f64) {
        self.exploration_rate = rate.clamp(0.0, 1.0);
    }

    fn complete_episode_manually(&mut self, reward: f64, termination: &str) {
        self.stats.complete_episode_with_reward(reward, termination);
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot::new(
            AgentKind::PolicyGradient,
            self.policy_net.clone(),
            self.exploration_rate,
        )
    }
}

#[derive(Serialize, Deserialize)]
struct PolicyGradientPayload {
    kind: AgentKind,
    policy_net: serde_json::Value,
    batch_size: usize,
    exploration_rate: f64,
    gamma: f64,
    update_count: u64,
    stats: EpisodeStats,
}
