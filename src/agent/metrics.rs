use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Window for the `recent_avg_reward` metric.
const RECENT_WINDOW: usize = 100;

/// Aggregate agent statistics surfaced to the operator and the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentMetrics {
    pub episodes: u64,
    pub avg_reward: f64,
    pub recent_avg_reward: f64,
    pub best_reward: f64,
    pub exploration_rate: f64,
    pub buffer_size: usize,
    pub avg_episode_length: f64,
    pub termination_counts: BTreeMap<String, u64>,
}

/// Per-episode bookkeeping shared by all agent variants.
///
/// Tracks the running episode, a bounded history of episode rewards, and how
/// episodes ended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeStats {
    episodes: u64,
    total_reward: f64,
    total_length: u64,
    best_reward: Option<f64>,
    recent_rewards: Vec<f64>,
    termination_counts: BTreeMap<String, u64>,

    current_reward: f64,
    current_length: u64,
}

impl EpisodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one step of the running episode.
    pub fn record_step(&mut self, reward: f64) {
        self.current_reward += reward;
        self.current_length += 1;
    }

    /// Closes the running episode under the given termination label.
    pub fn complete_episode(&mut self, termination: &str) {
        self.episodes += 1;
        self.total_reward += self.current_reward;
        self.total_length += self.current_length;
        self.best_reward = Some(match self.best_reward {
            Some(best) => best.max(self.current_reward),
            None => self.current_reward,
        });
        self.recent_rewards.push(self.current_reward);
        if self.recent_rewards.len() > RECENT_WINDOW {
            self.recent_rewards.remove(0);
        }
        *self
            .termination_counts
            .entry(termination.to_string())
            .or_insert(0) += 1;
        self.current_reward = 0.0;
        self.current_length = 0;
    }

    /// Closes the running episode with an extra attributed reward, for
    /// caller-imposed terminations such as step limits.
    pub fn complete_episode_with_reward(&mut self, reward: f64, termination: &str) {
        self.current_reward += reward;
        self.complete_episode(termination);
    }

    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn avg_reward(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.total_reward / self.episodes as f64
        }
    }

    pub fn recent_avg_reward(&self) -> f64 {
        if self.recent_rewards.is_empty() {
            0.0
        } else {
            self.recent_rewards.iter().sum::<f64>() / self.recent_rewards.len() as f64
        }
    }

    pub fn best_reward(&self) -> f64 {
        self.best_reward.unwrap_or(0.0)
    }

    pub fn avg_episode_length(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.total_length as f64 / self.episodes as f64
        }
    }

    pub fn termination_counts(&self) -> &BTreeMap<String, u64> {
        &self.termination_counts
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Builds the public metrics view, filling in agent-owned fields.
    pub fn metrics(&self, exploration_rate: f64, buffer_size: usize) -> AgentMetrics {
        AgentMetrics {
            episodes: self.episodes,
            avg_reward: self.avg_reward(),
            recent_avg_reward: self.recent_avg_reward(),
            best_reward: self.best_reward(),
            exploration_rate,
            buffer_size,
            avg_episode_length: self.avg_episode_length(),
            termination_counts: self.termination_counts.clone(),
        }
    }
}
