use std::collections::VecDeque;

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::{SliceRandom, index};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{CaissaResult, ReplayError};
use crate::gym::Transition;

/// Eviction policy applied when an insertion would exceed capacity.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictionStrategy {
    /// Drop the transition that has been stored the longest.
    #[default]
    OldestFirst,

    /// Drop the transition with the smallest absolute reward.
    LowestQuality,

    /// Drop a uniformly chosen transition.
    Random,
}

/// Sampling policy for one draw from the buffer.
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
pub enum SamplingStrategy {
    /// Every stored transition is equally likely.
    #[default]
    Uniform,

    /// The newest `min(batch, size/2)` transitions, topped up uniformly from
    /// the remainder.
    Recent,

    /// One third recent, two thirds uniform, shuffled together.
    Mixed,
}

/// Bounded ring of transitions with pluggable eviction and sampling.
///
/// All randomness flows from the replay stream handed in at construction, so
/// a fixed master seed plus a fixed call sequence reproduces every sample
/// multiset exactly.
#[derive(Debug)]
pub struct ReplayBuffer {
    transitions: VecDeque<Transition>,
    capacity: usize,
    eviction: EvictionStrategy,
    sampling: SamplingStrategy,
    rng: StdRng,
}

impl ReplayBuffer {
    pub fn new(
        capacity: usize,
        eviction: EvictionStrategy,
        sampling: SamplingStrategy,
        rng: StdRng,
    ) -> CaissaResult<Self> {
        if capacity == 0 {
            return Err(ReplayError::ZeroCapacity.into());
        }
        Ok(Self {
            transitions: VecDeque::with_capacity(capacity),
            capacity,
            eviction,
            sampling,
            rng,
        })
    }

    pub fn size(&self) -> usize {
        self.transitions.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.transitions.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
    }

    pub fn eviction_strategy(&self) -> EvictionStrategy {
        self.eviction
    }

    /// Inserts one transition, evicting exactly one element when full.
    pub fn add(&mut self, transition: Transition) {
        if self.is_full() {
            self.evict_one();
        }
        self.transitions.push_back(transition);
    }

    /// Shrinks the buffer down to `target` elements using the active eviction
    /// strategy.
    pub fn trim_to(&mut self, target: usize) {
        while self.transitions.len() > target {
            self.evict_one();
        }
    }

    fn evict_one(&mut self) {
        match self.eviction {
            EvictionStrategy::OldestFirst => {
                self.transitions.pop_front();
            }
            EvictionStrategy::LowestQuality => {
                let victim = self
                    .transitions
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        a.reward
                            .abs()
                            .partial_cmp(&b.reward.abs())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(i, _)| i);
                if let Some(i) = victim {
                    self.transitions.remove(i);
                }
            }
            EvictionStrategy::Random => {
                let i = self.rng.random_range(0..self.transitions.len());
                self.transitions.remove(i);
            }
        }
    }

    /// Draws up to `batch` distinct transitions with the configured strategy.
    pub fn sample(&mut self, batch: usize) -> Vec<Transition> {
        self.sample_with_strategy(batch, self.sampling)
    }

    pub fn sample_with_strategy(&mut self, batch: usize, strategy: SamplingStrategy) -> Vec<Transition> {
        let take = batch.min(self.transitions.len());
        if take == 0 {
            return Vec::new();
        }
        let indices = self.sample_indices(take, strategy);
        indices
            .into_iter()
            .map(|i| self.transitions[i].clone())
            .collect()
    }

    fn sample_indices(&mut self, take: usize, strategy: SamplingStrategy) -> Vec<usize> {
        let size = self.transitions.len();
        match strategy {
            SamplingStrategy::Uniform => index::sample(&mut self.rng, size, take).into_vec(),
            SamplingStrategy::Recent => {
                let recent = take.min(size / 2);
                let mut chosen: Vec<usize> = (size - recent..size).collect();
                let remainder = take - recent;
                if remainder > 0 {
                    let pool = size - recent;
                    let fill = index::sample(&mut self.rng, pool, remainder.min(pool));
                    chosen.extend(fill.into_iter());
                }
                chosen
            }
            SamplingStrategy::Mixed => {
                let recent = (take / 3).min(size / 2);
                let mut chosen: Vec<usize> = (size - recent..size).collect();
                let pool = size - recent;
                let remainder = (take - recent).min(pool);
                let fill = index::sample(&mut self.rng, pool, remainder);
                chosen.extend(fill.into_iter());
                chosen.shuffle(&mut self.rng);
                chosen
            }
        }
    }
}

// ============================================================================
// Prioritized variant
// ============================================================================

/// Proportional prioritized replay.
///
/// Sampling probability is proportional to `(|priority| + eps)^alpha`; `beta`
/// anneals linearly toward one per sample call. The beta schedule is not
/// persisted across process restarts.
#[derive(Debug)]
pub struct PrioritizedReplayBuffer {
    transitions: VecDeque<Transition>,
    priorities: VecDeque<f64>,
    capacity: usize,
    alpha: f64,
    beta: f64,
    beta_increment: f64,
    epsilon: f64,
    max_priority: f64,
    rng: StdRng,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedConfig {
    pub alpha: f64,
    pub beta_start: f64,
    pub beta_increment: f64,
    pub epsilon: f64,
}

impl Default for PrioritizedConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta_start: 0.4,
            beta_increment: 0.001,
            epsilon: 1e-6,
        }
    }
}

impl PrioritizedReplayBuffer {
    pub fn new(capacity: usize, config: PrioritizedConfig, rng: StdRng) -> CaissaResult<Self> {
        if capacity == 0 {
            return Err(ReplayError::ZeroCapacity.into());
        }
        Ok(Self {
            transitions: VecDeque::with_capacity(capacity),
            priorities: VecDeque::with_capacity(capacity),
            capacity,
            alpha: config.alpha,
            beta: config.beta_start,
            beta_increment: config.beta_increment,
            epsilon: config.epsilon,
            max_priority: 1.0,
            rng,
        })
    }

    pub fn size(&self) -> usize {
        self.transitions.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
        self.priorities.clear();
        self.max_priority = 1.0;
    }

    /// New transitions enter with the maximum priority seen so far, so every
    /// experience is sampled at least once with high probability.
    pub fn add(&mut self, transition: Transition) {
        if self.transitions.len() >= self.capacity {
            self.transitions.pop_front();
            self.priorities.pop_front();
        }
        self.transitions.push_back(transition);
        self.priorities.push_back(self.max_priority);
    }

    /// Draws `batch` distinct transitions; returns their buffer indices for a
    /// later priority update.
    pub fn sample(&mut self, batch: usize) -> (Vec<usize>, Vec<Transition>) {
        self.beta = (self.beta + self.beta_increment).min(1.0);
        let take = batch.min(self.transitions.len());
        if take == 0 {
            return (Vec::new(), Vec::new());
        }

        let mut weights: Vec<f64> = self
            .priorities
            .iter()
            .map(|p| (p.abs() + self.epsilon).powf(self.alpha))
            .collect();
        let mut indices = Vec::with_capacity(take);
        for _ in 0..take {
            let total: f64 = weights.iter().sum();
            let mut threshold = self.rng.random_range(0.0..total.max(f64::MIN_POSITIVE));
            let mut chosen = weights.len() - 1;
            for (i, &w) in weights.iter().enumerate() {
                if w <= 0.0 {
                    continue;
                }
                if threshold < w {
                    chosen = i;
                    break;
                }
                threshold -= w;
            }
            indices.push(chosen);
            weights[chosen] = 0.0;
        }

        let sampled = indices.iter().map(|&i| self.transitions[i].clone()).collect();
        (indices, sampled)
    }

    pub fn update_priorities(&mut self, indices: &[usize], td_errors: &[f64]) -> CaissaResult<()> {
        if indices.len() != td_errors.len() {
            return Err(ReplayError::MismatchedPriorityLengths {
                indices: indices.len(),
                priorities: td_errors.len(),
            }
            .into());
        }
        for (&i, &err) in indices.iter().zip(td_errors) {
            if i >= self.priorities.len() {
                return Err(ReplayError::PriorityIndexOutOfBounds {
                    index: i,
                    size: self.priorities.len(),
                }
                .into());
            }
            let priority = err.abs();
            self.priorities[i] = priority;
            if priority > self.max_priority {
                self.max_priority = priority;
            }
        }
        Ok(())
    }

    /// Importance correction per sampled index: `max_priority / (p_i + eps)`.
    pub fn importance_weights(&self, indices: &[usize]) -> CaissaResult<Vec<f64>> {
        indices
            .iter()
            .map(|&i| {
                self.priorities
                    .get(i)
                    .map(|p| self.max_priority / (p + self.epsilon))
                    .ok_or_else(|| {
                        ReplayError::PriorityIndexOutOfBounds {
                            index: i,
                            size: self.priorities.len(),
                        }
                        .into()
                    })
            })
            .collect()
    }
}
