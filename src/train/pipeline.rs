use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::{Agent, PolicyUpdateResult};
use crate::error::CaissaResult;
use crate::gym::Transition;
use crate::replay::{ReplayBuffer, SamplingStrategy};

/// Training-phase parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Batched updates per iteration.
    pub updates_per_iteration: usize,
    pub replay_batch_size: usize,
    pub sampling_strategy: SamplingStrategy,
    pub max_buffer_size: usize,
    pub early_stop_window: usize,
    /// Mean performance over the trailing window that triggers early stop;
    /// `None` disables the check.
    pub early_stop_threshold: Option<f64>,
}

/// Summary of one training phase.
#[derive(Debug, Clone, Default)]
pub struct TrainingPhaseReport {
    pub updates: Vec<PolicyUpdateResult>,
    /// Transient update failures; each becomes a validator issue upstream.
    pub failures: Vec<String>,
    pub transitions_consumed: usize,
}

impl TrainingPhaseReport {
    pub fn last_update(&self) -> Option<&PolicyUpdateResult> {
        self.updates.last()
    }

    pub fn average_loss(&self) -> f64 {
        if self.updates.is_empty() {
            0.0
        } else {
            self.updates.iter().map(|u| u.loss).sum::<f64>() / self.updates.len() as f64
        }
    }

    pub fn average_gradient_norm(&self) -> f64 {
        if self.updates.is_empty() {
            0.0
        } else {
            self.updates.iter().map(|u| u.gradient_norm).sum::<f64>() / self.updates.len() as f64
        }
    }

    pub fn average_entropy(&self) -> f64 {
        if self.updates.is_empty() {
            0.0
        } else {
            self.updates.iter().map(|u| u.policy_entropy).sum::<f64>() / self.updates.len() as f64
        }
    }
}

/// Draws sampled batches from the replay buffer and drives the agent's
/// learning entry points.
///
/// Transient update errors never abort an iteration: the failed batch is
/// discarded by the agent, the error is recorded, and training continues.
pub struct TrainingPipeline {
    config: PipelineConfig,
    buffer: ReplayBuffer,
    performance_history: Vec<f64>,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig, buffer: ReplayBuffer) -> Self {
        Self {
            config,
            buffer,
            performance_history: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ReplayBuffer {
        &mut self.buffer
    }

    pub fn performance_history(&self) -> &[f64] {
        &self.performance_history
    }

    /// Appends self-play experiences, trimming to the size cap with the
    /// buffer's eviction strategy.
    pub fn ingest(&mut self, experiences: Vec<Transition>) {
        for transition in experiences {
            self.buffer.add(transition);
        }
        self.buffer.trim_to(self.config.max_buffer_size);
    }

    /// Runs the configured number of batched updates. Each batch is fed
    /// through `learn` per transition and flushed with `force_update`.
    pub fn train(&mut self, agent: &mut dyn Agent) -> CaissaResult<TrainingPhaseReport> {
        let mut report = TrainingPhaseReport::default();
        if self.buffer.is_empty() {
            debug!("replay buffer empty; skipping training phase");
            return Ok(report);
        }
        for batch_index in 0..self.config.updates_per_iteration {
            let batch = self
                .buffer
                .sample_with_strategy(self.config.replay_batch_size, self.config.sampling_strategy);
            report.transitions_consumed += batch.len();
            let mut batch_failed = false;
            for transition in &batch {
                match agent.learn(transition) {
                    Ok(Some(update)) => report.updates.push(update),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(batch_index, error = %e, "transient update failure");
                        report.failures.push(e.to_string());
                        batch_failed = true;
                        break;
                    }
                }
            }
            if batch_failed {
                continue;
            }
            match agent.force_update() {
                Ok(Some(update)) => report.updates.push(update),
                Ok(None) => {}
                Err(e) => {
                    warn!(batch_index, error = %e, "transient update failure on flush");
                    report.failures.push(e.to_string());
                }
            }
        }
        Ok(report)
    }

    /// Records one evaluation performance scalar.
    pub fn record_performance(&mut self, performance: f64) {
        self.performance_history.push(performance);
    }

    /// Early-stopping predicate: the trailing window's mean performance
    /// exceeds the configured threshold.
    pub fn should_stop_early(&self) -> bool {
        let Some(threshold) = self.config.early_stop_threshold else {
            return false;
        };
        let window = self.config.early_stop_window;
        if self.performance_history.len() < window {
            return false;
        }
        let tail = &self.performance_history[self.performance_history.len() - window..];
        let mean = tail.iter().sum::<f64>() / window as f64;
        mean > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, make_agent};
    use crate::nn::NetworkConfig;
    use crate::replay::EvictionStrategy;
    use crate::seed::SeedManager;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn pipeline(max_buffer: usize) -> TrainingPipeline {
        let buffer = ReplayBuffer::new(
            max_buffer,
            EvictionStrategy::OldestFirst,
            SamplingStrategy::Uniform,
            StdRng::seed_from_u64(0),
        )
        .unwrap();
        TrainingPipeline::new(
            PipelineConfig {
                updates_per_iteration: 2,
                replay_batch_size: 4,
                sampling_strategy: SamplingStrategy::Uniform,
                max_buffer_size: max_buffer,
                early_stop_window: 3,
                early_stop_threshold: Some(0.8),
            },
            buffer,
        )
    }

    fn agent() -> Box<dyn Agent> {
        let seeds = SeedManager::new();
        seeds.set_master(6).unwrap();
        make_agent(
            AgentKind::Dqn,
            NetworkConfig {
                input_size: 3,
                hidden_layers: vec![6],
                output_size: 4,
                ..NetworkConfig::default()
            },
            4,
            0.0,
            &seeds,
        )
        .unwrap()
    }

    fn transition(action: usize) -> Transition {
        Transition::new(vec![0.1, 0.2, 0.3], action, 0.5, vec![0.3, 0.2, 0.1], false)
    }

    #[test]
    fn empty_buffer_skips_training() {
        let mut pipeline = pipeline(16);
        let mut agent = agent();
        let report = pipeline.train(agent.as_mut()).unwrap();
        assert!(report.updates.is_empty());
        assert_eq!(report.transitions_consumed, 0);
    }

    #[test]
    fn training_produces_updates() {
        let mut pipeline = pipeline(16);
        pipeline.ingest((0..8).map(|i| transition(i % 4)).collect());
        let mut agent = agent();
        let report = pipeline.train(agent.as_mut()).unwrap();
        assert!(!report.updates.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.transitions_consumed, 8);
        assert!(report.average_loss().is_finite());
    }

    #[test]
    fn ingest_enforces_buffer_cap() {
        let mut pipeline = pipeline(4);
        pipeline.ingest((0..20).map(|i| transition(i % 4)).collect());
        assert_eq!(pipeline.buffer().size(), 4);
    }

    #[test]
    fn state_size_mismatch_is_transient_not_fatal() {
        let mut pipeline = pipeline(16);
        pipeline
            .buffer_mut()
            .add(Transition::new(vec![0.0; 7], 0, 0.0, vec![0.0; 7], false));
        let mut agent = agent();
        let report = pipeline.train(agent.as_mut()).unwrap();
        assert!(!report.failures.is_empty());
    }

    #[test]
    fn early_stop_needs_full_window_above_threshold() {
        let mut pipeline = pipeline(16);
        assert!(!pipeline.should_stop_early());
        pipeline.record_performance(0.9);
        pipeline.record_performance(0.9);
        assert!(!pipeline.should_stop_early(), "window not yet full");
        pipeline.record_performance(0.95);
        assert!(pipeline.should_stop_early());
        pipeline.record_performance(0.0);
        pipeline.record_performance(0.0);
        pipeline.record_performance(0.0);
        assert!(!pipeline.should_stop_early());
    }
}
