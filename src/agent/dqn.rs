use std::fs;
use std::path::Path;

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::metrics::{AgentMetrics, EpisodeStats};
use crate::agent::{
    Agent, AgentKind, AgentSnapshot, PolicyUpdateResult, argmax_over, entropy, masked_softmax,
};
use crate::error::{AgentError, CaissaResult, IoError};
use crate::gym::Transition;
use crate::nn::{Mlp, NetworkConfig};
use crate::seed::SeedManager;

const DEFAULT_GAMMA: f64 = 0.99;
const TARGET_SYNC_INTERVAL: u64 = 100;

/// Deep Q-learning agent with a periodically synced target network.
///
/// Action selection is epsilon-greedy over masked Q-values. `learn` buffers
/// transitions and runs a TD update once the buffer reaches the configured
/// batch size or an episode ends.
pub struct DqnAgent {
    q_net: Mlp,
    target_net: Mlp,
    batch_size: usize,
    exploration_rate: f64,
    gamma: f64,
    pending: Vec<Transition>,
    stats: EpisodeStats,
    rng: StdRng,
    update_count: u64,
}

impl DqnAgent {
    pub fn new(
        network: NetworkConfig,
        batch_size: usize,
        exploration_rate: f64,
        seeds: &SeedManager,
    ) -> CaissaResult<Self> {
        let mut init_rng = seeds.stream("neural_network")?;
        let q_net = Mlp::new(network, &mut init_rng)?;
        let target_net = q_net.clone();
        Ok(Self {
            q_net,
            target_net,
            batch_size: batch_size.max(1),
            exploration_rate,
            gamma: DEFAULT_GAMMA,
            pending: Vec::new(),
            stats: EpisodeStats::new(),
            rng: seeds.stream("exploration")?,
            update_count: 0,
        })
    }

    fn check_state(&self, state: &[f64]) -> CaissaResult<()> {
        if state.len() != self.q_net.input_size() {
            return Err(AgentError::StateSizeMismatch {
                expected: self.q_net.input_size(),
                got: state.len(),
            }
            .into());
        }
        Ok(())
    }

    fn termination_label(transition: &Transition) -> &'static str {
        if transition.reward > 0.0 {
            "win"
        } else if transition.reward < 0.0 {
            "loss"
        } else {
            "draw"
        }
    }

    /// Runs one TD update over the buffered transitions.
    fn update(&mut self) -> CaissaResult<PolicyUpdateResult> {
        let batch = std::mem::take(&mut self.pending);
        let mut total_loss = 0.0;
        let mut total_grad = 0.0;
        let mut total_entropy = 0.0;
        let mut total_q = 0.0;
        let mut total_target = 0.0;
        let count = batch.len() as f64;

        for transition in &batch {
            let q_values = self.q_net.predict(&transition.state);
            let max_next = if transition.done {
                0.0
            } else {
                self.target_net
                    .predict(&transition.next_state)
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max)
            };
            let target_value = transition.reward + self.gamma * max_next;
            if !target_value.is_finite() {
                return Err(AgentError::UpdateFailed(format!(
                    "non-finite TD target for action {}",
                    transition.action
                ))
                .into());
            }

            total_q += q_values[transition.action];
            total_target += target_value;
            let all_actions: Vec<usize> = (0..q_values.len()).collect();
            total_entropy += entropy(&masked_softmax(&q_values, &all_actions));

            let mut target_vec = q_values.to_vec();
            target_vec[transition.action] = target_value;
            let (loss, grad_norm) = self.q_net.train_step(&transition.state, &target_vec)?;
            total_loss += loss;
            total_grad += grad_norm;
        }

        self.update_count += 1;
        if self.update_count % TARGET_SYNC_INTERVAL == 0 {
            self.target_net = self.q_net.clone();
            debug!(update = self.update_count, "target network synced");
        }

        Ok(PolicyUpdateResult {
            loss: total_loss / count,
            gradient_norm: total_grad / count,
            policy_entropy: total_entropy / count,
            mean_q: Some(total_q / count),
            mean_target: Some(total_target / count),
        })
    }
}

impl Agent for DqnAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Dqn
    }

    fn state_size(&self) -> usize {
        self.q_net.input_size()
    }

    fn action_size(&self) -> usize {
        self.q_net.output_size()
    }

    fn select_action(&mut self, state: &[f64], valid_actions: &[usize]) -> CaissaResult<usize> {
        if valid_actions.is_empty() {
            return Err(AgentError::EmptyValidActions.into());
        }
        self.check_state(state)?;
        if self.rng.random_range(0.0..1.0) < self.exploration_rate {
            return Ok(valid_actions[self.rng.random_range(0..valid_actions.len())]);
        }
        Ok(argmax_over(&self.q_net.predict(state), valid_actions))
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
        self.pending.push(transition.clone());
        if transition.done {
            self.stats.complete_episode(Self::termination_label(transition));
        }
        if self.pending.len() >= self.batch_size || transition.done {
            return self.update().map(Some);
        }
        Ok(None)
    }

    fn force_update(&mut self) -> CaissaResult<Option<PolicyUpdateResult>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.update().map(Some)
    }

    fn get_q_values(&self, state: &[f64], actions: &[usize]) -> CaissaResult<Vec<(usize, f64)>> {
        self.check_state(state)?;
        let output = self.q_net.predict(state);
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
        let probs = masked_softmax(&self.q_net.predict(state), actions);
        Ok(actions.iter().copied().zip(probs).collect())
    }

    fn save(&self, path: &Path) -> CaissaResult<()> {
        let payload = DqnPayload {
            kind: AgentKind::Dqn,
            q_net: self.q_net.to_json_value()?,
            target_net: self.target_net.to_json_value()?,
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
        let payload: DqnPayload = serde_json::from_str(&json).map_err(IoError::from)?;
        self.q_net = Mlp::from_json_value(payload.q_net)?;
        self.target_net = Mlp::from_json_value(payload.target_net)?;
        self.batch_size = payload.batch_size;
        self.exploration_rate = payload.exploration_rate;
        self.gamma = payload.gamma;
        self.update_count = payload.update_count;
        self.stats = payload.stats;
        self.pending.clear();
        Ok(())
    }

    fn export_network(&self) -> CaissaResult<serde_json::Value> {
        self.q_net.to_json_value()
    }

    fn import_network(&mut self, value: serde_json::Value) -> CaissaResult<()> {
        let net = Mlp::from_json_value(value)?;
        self.target_net = net.clone();
        self.q_net = net;
        Ok(())
    }

    fn metrics(&self) -> AgentMetrics {
        self.stats.metrics(self.exploration_rate, self.pending.len())
    }

    fn reset(&mut self) {
        self.pending.clear();
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
        AgentSnapshot::new(AgentKind::Dqn, self.q_net.clone(), self.exploration_rate)
    }
}

#[derive(Serialize, Deserialize)]
struct DqnPayload {
    kind: AgentKind,
    q_net: serde_json::Value,
    target_net: serde_json::Value,
    batch_size: usize,
    exploration_rate: f64,
    gamma: f64,
    update_count: u64,
    stats: EpisodeStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds() -> SeedManager {
        let manager = SeedManager::new();
        manager.set_master(42).unwrap();
        manager
    }

    fn network() -> NetworkConfig {
        NetworkConfig {
            input_size: 4,
            hidden_layers: vec![8],
            output_size: 5,
            learning_rate: 0.01,
            ..NetworkConfig::default()
        }
    }

    fn agent() -> DqnAgent {
        DqnAgent::new(network(), 4, 0.0, &seeds()).unwrap()
    }

    fn transition(action: usize, reward: f64, done: bool) -> Transition {
        Transition::new(vec![0.1, 0.2, 0.3, 0.4], action, reward, vec![0.4, 0.3, 0.2, 0.1], done)
    }

    #[test]
    fn greedy_selection_is_deterministic() {
        let mut agent = agent();
        let state = [0.5, 0.5, 0.5, 0.5];
        let first = agent.select_action(&state, &[0, 1, 2]).unwrap();
        let second = agent.select_action(&state, &[0, 1, 2]).unwrap();
        assert_eq!(first, second);
        assert!([0, 1, 2].contains(&first));
    }

    #[test]
    fn empty_valid_actions_errors() {
        let mut agent = agent();
        assert!(agent.select_action(&[0.0; 4], &[]).is_err());
    }

    #[test]
    fn state_size_mismatch_errors() {
        let mut agent = agent();
        assert!(agent.select_action(&[0.0; 3], &[0]).is_err());
        assert!(agent.learn(&Transition::new(vec![0.0; 3], 0, 0.0, vec![0.0; 4], false)).is_err());
    }

    #[test]
    fn learn_triggers_update_at_batch_size() {
        let mut agent = agent();
        assert!(agent.learn(&transition(0, 0.0, false)).unwrap().is_none());
        assert!(agent.learn(&transition(1, 0.0, false)).unwrap().is_none());
        assert!(agent.learn(&transition(2, 0.0, false)).unwrap().is_none());
        let result = agent.learn(&transition(3, 1.0, false)).unwrap();
        let update = result.expect("fourth transition fills the batch");
        assert!(update.loss.is_finite());
        assert!(update.gradient_norm >= 0.0);
        assert!(update.mean_q.is_some());
    }

    #[test]
    fn done_triggers_update_and_episode() {
        let mut agent = agent();
        let result = agent.learn(&transition(0, 1.0, true)).unwrap();
        assert!(result.is_some());
        let metrics = agent.metrics();
        assert_eq!(metrics.episodes, 1);
        assert_eq!(metrics.termination_counts["win"], 1);
    }

    #[test]
    fn force_update_flushes_partial_batch() {
        let mut agent = agent();
        agent.learn(&transition(0, 0.1, false)).unwrap();
        assert!(agent.force_update().unwrap().is_some());
        assert!(agent.force_update().unwrap().is_none());
    }

    #[test]
    fn probabilities_sum_to_one() {
        let agent = agent();
        let probs = agent
            .get_action_probabilities(&[0.1, 0.1, 0.1, 0.1], &[0, 2, 4])
            .unwrap();
        let total: f64 = probs.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(probs.iter().all(|(a, _)| [0, 2, 4].contains(a)));
    }

    #[test]
    fn save_load_restores_selection() {
        let dir = std::env::temp_dir().join(format!("caissa-dqn-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("agent.json");

        let mut agent = agent();
        // Push the weights away from their initial values.
        for i in 0..8 {
            agent.learn(&transition(i % 5, 0.5, false)).unwrap();
        }
        agent.force_update().unwrap();
        agent.save(&path).unwrap();

        let mut restored = DqnAgent::new(network(), 4, 0.0, &seeds()).unwrap();
        restored.load(&path).unwrap();
        let state = [0.3, 0.1, 0.9, 0.2];
        assert_eq!(
            agent.get_q_values(&state, &[0, 1, 2, 3, 4]).unwrap(),
            restored.get_q_values(&state, &[0, 1, 2, 3, 4]).unwrap()
        );

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn exploration_rate_is_clamped() {
        let mut agent = agent();
        agent.set_exploration_rate(1.5);
        assert_eq!(agent.exploration_rate(), 1.0);
        agent.set_exploration_rate(-0.5);
        assert_eq!(agent.exploration_rate(), 0.0);
    }
}
