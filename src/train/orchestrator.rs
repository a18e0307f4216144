use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{Agent, AgentMetrics, make_agent};
use crate::checkpoint::{CheckpointManager, CheckpointMetadata};
use crate::config::TrainingConfig;
use crate::convergence::{ConvergenceDetector, ConvergenceStatus};
use crate::error::{CaissaResult, SystemError};
use crate::gym::env::STATE_FEATURES;
use crate::gym::{ActionSpace, ChessEnv};
use crate::replay::ReplayBuffer;
use crate::seed::SeedManager;
use crate::selfplay::{SelfPlayEngine, SelfPlayReport};
use crate::train::evaluation::{EvaluationReport, evaluate_snapshots};
use crate::train::opponent::OpponentManager;
use crate::train::pipeline::{PipelineConfig, TrainingPipeline};
use crate::validate::{TrainingValidator, ValidationRecord};

/// Outcome of one full iteration (self-play → train → evaluate →
/// opponent-update → checkpoint → validate).
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: u64,
    pub games: usize,
    pub experiences: usize,
    pub average_game_length: f64,
    pub average_loss: f64,
    pub average_gradient_norm: f64,
    pub average_entropy: f64,
    pub training_failures: usize,
    pub evaluation: EvaluationReport,
    pub validation: Option<ValidationRecord>,
    pub convergence: ConvergenceStatus,
    pub checkpoint_version: Option<u64>,
    pub opponent_updated: bool,
    /// Set when this iteration decided the run should end.
    pub should_stop: bool,
}

/// Final summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub iterations_completed: u64,
    pub final_performance: f64,
    pub performance_series: Vec<f64>,
    pub converged: bool,
    pub early_stopped: bool,
    pub stopped_by_request: bool,
    pub best_checkpoint: Option<u64>,
}

/// Serialized orchestrator progress, embedded in session snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorState {
    pub iteration: u64,
    pub next_version: u64,
    pub performance_history: Vec<f64>,
}

/// Drives the full training cycle and owns every subsystem below it.
///
/// Ownership is a DAG rooted here: the seed manager, agent, environments,
/// self-play engine, pipeline, checkpoint store, validator, convergence
/// detector, and opponent manager hold no references back up.
pub struct TrainingOrchestrator {
    config: TrainingConfig,
    seeds: SeedManager,
    agent: Box<dyn Agent>,
    /// Same-shaped agent used to materialize historical opponent checkpoints.
    scratch: Box<dyn Agent>,
    env: ChessEnv,
    engine: SelfPlayEngine,
    pipeline: TrainingPipeline,
    checkpoints: CheckpointManager,
    validator: TrainingValidator,
    convergence: ConvergenceDetector,
    opponent: OpponentManager,
    iteration: u64,
    next_version: u64,
    stop_requested: bool,
}

impl TrainingOrchestrator {
    pub fn new(config: TrainingConfig, workdir: &Path) -> CaissaResult<Self> {
        config.validate()?;

        let seeds = SeedManager::new();
        match (config.seed, config.deterministic_mode) {
            (Some(seed), _) => seeds.set_master(seed)?,
            (None, true) => seeds.enable_test_mode()?,
            (None, false) => {
                seeds.set_random()?;
            }
        }

        let env = ChessEnv::new(config.reward_config(), config.adjudication_config())?;
        let network = config.network_config(STATE_FEATURES, ActionSpace::SIZE);
        let agent = make_agent(
            config.agent_kind,
            network.clone(),
            config.batch_size,
            config.exploration_rate,
            &seeds,
        )?;
        let scratch = make_agent(
            config.agent_kind,
            network,
            config.batch_size,
            config.exploration_rate,
            &seeds,
        )?;

        let engine = SelfPlayEngine::new(config.selfplay_config())?;
        let buffer = ReplayBuffer::new(
            config.max_buffer_size,
            config.experience_cleanup,
            config.sampling_strategy,
            seeds.stream("replay")?,
        )?;
        let pipeline = TrainingPipeline::new(
            PipelineConfig {
                updates_per_iteration: config.updates_per_iteration,
                replay_batch_size: config.replay_batch_size,
                sampling_strategy: config.sampling_strategy,
                max_buffer_size: config.max_buffer_size,
                early_stop_window: config.early_stop_window,
                early_stop_threshold: config.early_stop_threshold,
            },
            buffer,
        );
        let checkpoints =
            CheckpointManager::new(workdir.join("checkpoints"), config.max_checkpoints)?;
        let opponent = OpponentManager::new(
            config.opponent_strategy,
            config.opponent_update_frequency,
            config.adaptive_threshold,
            agent.snapshot(),
        );

        Ok(Self {
            config,
            seeds,
            agent,
            scratch,
            env,
            engine,
            pipeline,
            checkpoints,
            validator: TrainingValidator::default(),
            convergence: ConvergenceDetector::default(),
            opponent,
            iteration: 0,
            next_version: 0,
            stop_requested: false,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn seeds(&self) -> &SeedManager {
        &self.seeds
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn agent_metrics(&self) -> AgentMetrics {
        self.agent.metrics()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn performance_history(&self) -> &[f64] {
        self.pipeline.performance_history()
    }

    pub fn buffer_size(&self) -> usize {
        self.pipeline.buffer().size()
    }

    /// Cooperative stop: takes effect at the next ply/batch boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
        self.engine.stop();
    }

    pub fn clear_stop(&mut self) {
        self.stop_requested = false;
        self.engine.clear_stop();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Applies runtime-adjustable parameters onto the live subsystems.
    pub fn apply_config(&mut self, config: &TrainingConfig) {
        self.agent.set_exploration_rate(config.exploration_rate);
        self.config = config.clone();
    }

    /// Progress snapshot taken at an iteration boundary.
    pub fn state(&self) -> OrchestratorState {
        OrchestratorState {
            iteration: self.iteration,
            next_version: self.next_version,
            performance_history: self.pipeline.performance_history().to_vec(),
        }
    }

    pub fn restore_state(&mut self, state: &OrchestratorState) {
        self.iteration = state.iteration;
        self.next_version = state.next_version;
        for &performance in &state.performance_history[self
            .pipeline
            .performance_history()
            .len()
            .min(state.performance_history.len())..]
        {
            self.pipeline.record_performance(performance);
        }
    }

    /// Runs iterations until the configured episode budget, a stop request,
    /// or the early-stopping predicate ends the loop.
    pub fn run(&mut self) -> CaissaResult<RunReport> {
        let mut early_stopped = false;
        let mut converged = false;
        while self.iteration < self.config.episodes as u64 {
            let report = self.run_iteration()?;
            converged = report.convergence.has_converged;
            if report.should_stop {
                early_stopped = !self.stop_requested;
                break;
            }
        }
        let series = self.pipeline.performance_history().to_vec();
        Ok(RunReport {
            iterations_completed: self.iteration,
            final_performance: series.last().copied().unwrap_or(0.0),
            performance_series: series,
            converged,
            early_stopped,
            stopped_by_request: self.stop_requested,
            best_checkpoint: self.checkpoints.best().map(|r| r.version),
        })
    }

    /// One pass through the seven phases.
    #[tracing::instrument(skip(self), fields(iteration = self.iteration))]
    pub fn run_iteration(&mut self) -> CaissaResult<IterationReport> {
        let iteration = self.iteration;

        // 1. Self-play phase.
        let main_snapshot = self.agent.snapshot();
        let selfplay: SelfPlayReport = self.engine.run_iteration(
            iteration,
            &main_snapshot,
            self.opponent.snapshot(),
            &self.env,
            &self.seeds,
        )?;

        // Step-limited games end here, not inside the environment: the
        // orchestrator attributes the penalty and optionally reports a draw.
        for _ in &selfplay.step_limit_games {
            let label = if self.config.treat_step_limit_as_draw_for_reporting {
                "draw_step_limit"
            } else {
                "step_limit"
            };
            self.agent
                .complete_episode_manually(self.config.step_limit_penalty, label);
        }

        // 2. Training phase.
        let before_metrics = self.agent.metrics();
        self.pipeline.ingest(selfplay.experiences.clone());
        let training = self.pipeline.train(self.agent.as_mut())?;
        for failure in &training.failures {
            warn!(iteration, failure, "training batch discarded");
        }

        // 3. Evaluation phase; its average reward is the performance scalar.
        let evaluation = evaluate_snapshots(
            &self.agent.snapshot(),
            self.opponent.snapshot(),
            &self.env,
            self.config.evaluation_games,
            iteration,
            self.config.max_steps_per_episode,
            &self.seeds,
        )?;
        let performance = evaluation.average_reward;

        // 4. Opponent update.
        let opponent_updated = self.opponent.maybe_update(
            iteration,
            self.agent.as_ref(),
            evaluation.win_rate,
            &self.checkpoints,
            self.scratch.as_mut(),
        )?;

        // 5. Checkpoint.
        let checkpoint_version = self.maybe_checkpoint(iteration, performance)?;

        // 6. Validation and convergence.
        let after_metrics = self.agent.metrics();
        let validation = training.last_update().map(|update| {
            self.validator
                .validate_update(&before_metrics, &after_metrics, update, iteration)
        });
        self.pipeline.record_performance(performance);
        let convergence = self.convergence.record(performance);

        // 7. Early-stop check.
        self.iteration += 1;
        let should_stop = self.stop_requested || self.pipeline.should_stop_early();

        if self.iteration % self.config.progress_report_interval as u64 == 0 {
            info!(
                iteration = self.iteration,
                performance,
                win_rate = evaluation.win_rate,
                buffer = self.pipeline.buffer().size(),
                "training progress"
            );
        }

        Ok(IterationReport {
            iteration,
            games: selfplay.total_games,
            experiences: selfplay.total_experiences,
            average_game_length: selfplay.average_game_length,
            average_loss: training.average_loss(),
            average_gradient_norm: training.average_gradient_norm(),
            average_entropy: training.average_entropy(),
            training_failures: training.failures.len(),
            evaluation,
            validation,
            convergence,
            checkpoint_version,
            opponent_updated,
            should_stop,
        })
    }

    /// Creates a checkpoint on the configured interval, on a strict best, and
    /// on the final iteration.
    fn maybe_checkpoint(&mut self, iteration: u64, performance: f64) -> CaissaResult<Option<u64>> {
        let interval = self.config.checkpoint_interval as u64;
        let is_strict_best = self
            .checkpoints
            .best()
            .map(|best| performance > best.metadata.performance)
            .unwrap_or(true);
        let is_final = iteration + 1 >= self.config.episodes as u64;
        if !(iteration % interval == 0 || is_strict_best || is_final) {
            return Ok(None);
        }
        let metadata = CheckpointMetadata {
            cycle: iteration,
            performance,
            description: self
                .config
                .description
                .clone()
                .unwrap_or_else(|| format!("iteration {iteration}")),
            is_best: false,
            seed_configuration: Some(self.seeds.serialize()?),
            training_configuration: Some(
                serde_json::to_value(&self.config)
                    .map_err(|e| SystemError::InvariantViolation(e.to_string()))?,
            ),
            additional_info: Default::default(),
        };
        let version = self.next_version;
        self.next_version += 1;
        let record = self
            .checkpoints
            .create(self.agent.as_ref(), version, metadata)?;
        Ok(Some(record.version))
    }
}
