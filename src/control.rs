use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::TrainingConfig;
use crate::control::journal::{ChangeKind, ConfigJournal};
use crate::control::session::{SessionSnapshot, SessionState, TrainingSession};
use crate::error::ControlError;
use crate::train::TrainingOrchestrator;

pub mod journal;
pub mod session;

pub use journal::{ConfigChange, ConfigJournal as Journal};
pub use session::{SessionState as State, TrainingSession as Session};

/// Operator-boundary result; the controller never panics and never leaks raw
/// error types upward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResult {
    Success(String),
    Error(String),
}

impl ControlResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ControlResult::Success(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ControlResult::Success(msg) | ControlResult::Error(msg) => msg,
        }
    }
}

impl From<ControlError> for ControlResult {
    fn from(error: ControlError) -> Self {
        ControlResult::Error(error.to_string())
    }
}

/// Outcome of a runtime configuration adjustment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdjustReport {
    pub applied: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

/// Translates operator commands into lifecycle transitions over the
/// orchestrator.
///
/// Ownership is a DAG rooted here; subsystems hold no reference back to the
/// controller. Pause takes effect at the next iteration boundary and captures
/// a [`SessionSnapshot`] which resume consumes.
pub struct LifecycleController {
    workdir: PathBuf,
    config: TrainingConfig,
    session: Option<TrainingSession>,
    snapshot: Option<SessionSnapshot>,
    orchestrator: Option<TrainingOrchestrator>,
    journal: ConfigJournal,
}

impl LifecycleController {
    pub fn new(config: TrainingConfig, workdir: impl Into<PathBuf>) -> Self {
        let journal = ConfigJournal::new(config.max_rollback_history);
        Self {
            workdir: workdir.into(),
            config,
            session: None,
            snapshot: None,
            orchestrator: None,
            journal,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Stopped)
    }

    pub fn session(&self) -> Option<&TrainingSession> {
        self.session.as_ref()
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn journal(&self) -> &ConfigJournal {
        &self.journal
    }

    pub fn orchestrator(&self) -> Option<&TrainingOrchestrator> {
        self.orchestrator.as_ref()
    }

    // ========================================================================
    // Lifecycle commands
    // ========================================================================

    pub fn start(&mut self, config: Option<TrainingConfig>) -> ControlResult {
        let current = self.state();
        if !current.can_transition_to(SessionState::Starting) {
            return ControlError::IllegalTransition {
                from: current.to_string(),
                requested: SessionState::Starting.to_string(),
            }
            .into();
        }
        if let Some(new_config) = config {
            if let Err(e) = new_config.validate() {
                return ControlResult::Error(format!("invalid configuration: {e}"));
            }
            self.config = new_config;
        }
        let mut session = TrainingSession::new(self.config.clone());
        match TrainingOrchestrator::new(self.config.clone(), &self.workdir) {
            Ok(orchestrator) => {
                session.state = SessionState::Running;
                info!(session_id = %session.id, "training session started");
                let id = session.id.clone();
                self.orchestrator = Some(orchestrator);
                self.session = Some(session);
                self.snapshot = None;
                ControlResult::Success(format!("session {id} running"))
            }
            Err(e) => {
                session.state = SessionState::Error;
                session.error = Some(e.to_string());
                error!(error = %e, "session initialization failed");
                self.session = Some(session);
                self.orchestrator = None;
                ControlError::InitFailed(e.to_string()).into()
            }
        }
    }

    pub fn pause(&mut self) -> ControlResult {
        let current = self.state();
        if current != SessionState::Running {
            return ControlError::IllegalTransition {
                from: current.to_string(),
                requested: SessionState::Paused.to_string(),
            }
            .into();
        }
        let (Some(session), Some(orchestrator)) =
            (self.session.as_mut(), self.orchestrator.as_mut())
        else {
            return ControlError::NoSession.into();
        };
        orchestrator.request_stop();
        let snapshot = SessionSnapshot {
            session_id: session.id.clone(),
            timestamp: Utc::now(),
            training_state: orchestrator.state(),
            configuration: self.config.clone(),
            controller_state: Default::default(),
            metrics_snapshot: orchestrator.agent_metrics(),
            iteration: orchestrator.iteration(),
        };
        session.state = SessionState::Paused;
        session.paused_time = Some(snapshot.timestamp);
        let iteration = snapshot.iteration;
        self.snapshot = Some(snapshot);
        info!(iteration, "session paused");
        ControlResult::Success(format!("paused at iteration {iteration}"))
    }

    pub fn resume(&mut self) -> ControlResult {
        let current = self.state();
        if current != SessionState::Paused {
            return ControlError::IllegalTransition {
                from: current.to_string(),
                requested: SessionState::Running.to_string(),
            }
            .into();
        }
        let Some(snapshot) = self.snapshot.take() else {
            return ControlError::MissingSnapshot.into();
        };
        let (Some(session), Some(orchestrator)) =
            (self.session.as_mut(), self.orchestrator.as_mut())
        else {
            return ControlError::NoSession.into();
        };
        if snapshot.session_id != session.id {
            return ControlResult::Error("snapshot belongs to a different session".to_string());
        }
        orchestrator.clear_stop();
        orchestrator.restore_state(&snapshot.training_state);
        session.state = SessionState::Running;
        session.resumed_time = Some(Utc::now());
        info!(iteration = snapshot.iteration, "session resumed");
        ControlResult::Success(format!("resumed at iteration {}", snapshot.iteration))
    }

    /// Idempotent when already stopped.
    pub fn stop(&mut self) -> ControlResult {
        match self.state() {
            SessionState::Stopped => ControlResult::Success("already stopped".to_string()),
            _ => {
                if let Some(orchestrator) = self.orchestrator.as_mut() {
                    orchestrator.request_stop();
                }
                if let Some(session) = self.session.as_mut() {
                    session.state = SessionState::Stopped;
                    session.end_time = Some(Utc::now());
                }
                self.orchestrator = None;
                self.snapshot = None;
                info!("session stopped");
                ControlResult::Success("stopped".to_string())
            }
        }
    }

    /// `stop` followed by `start(config or last)`.
    pub fn restart(&mut self, config: Option<TrainingConfig>) -> ControlResult {
        let stopped = self.stop();
        if !stopped.is_success() {
            return stopped;
        }
        self.session = None;
        self.start(config)
    }

    // ========================================================================
    // Driving the run
    // ========================================================================

    /// Runs one iteration. Completion and errors move the session to their
    /// terminal states.
    pub fn step(&mut self) -> ControlResult {
        if self.state() != SessionState::Running {
            return ControlError::IllegalTransition {
                from: self.state().to_string(),
                requested: "step".to_string(),
            }
            .into();
        }
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return ControlError::NoSession.into();
        };
        match orchestrator.run_iteration() {
            Ok(report) => {
                let iteration = orchestrator.iteration();
                let budget = orchestrator.config().episodes as u64;
                if report.should_stop || iteration >= budget {
                    if let Some(session) = self.session.as_mut() {
                        session.state = SessionState::Completed;
                        session.end_time = Some(Utc::now());
                    }
                    ControlResult::Success(format!("completed after {iteration} iterations"))
                } else {
                    ControlResult::Success(format!("iteration {} done", report.iteration))
                }
            }
            Err(e) => {
                if let Some(session) = self.session.as_mut() {
                    session.state = SessionState::Error;
                    session.error = Some(e.to_string());
                }
                error!(error = %e, "iteration failed");
                ControlResult::Error(format!("iteration failed: {e}"))
            }
        }
    }

    /// Steps until the session leaves the Running state.
    pub fn run_to_completion(&mut self) -> ControlResult {
        let mut last = ControlResult::Success("idle".to_string());
        while self.state() == SessionState::Running {
            last = self.step();
        }
        last
    }

    // ========================================================================
    // Runtime configuration adjustment
    // ========================================================================

    /// Validates and optionally applies one parameter change.
    ///
    /// Unknown parameters are a warning with an `UnknownParameter` journal
    /// entry, never an error. Restart-required parameters apply to the stored
    /// configuration with a warning and take effect on the next start.
    pub fn adjust(
        &mut self,
        parameter: &str,
        value: serde_json::Value,
        reason: &str,
        validate_only: bool,
    ) -> AdjustReport {
        let mut report = AdjustReport::default();

        if !TrainingConfig::known_parameters().contains(&parameter.to_string()) {
            let warning = format!("unknown parameter '{parameter}' ignored");
            warn!(parameter, "unknown parameter in adjust");
            self.journal.record(
                ChangeKind::UnknownParameter,
                parameter,
                None,
                Some(value),
                reason,
                "controller",
            );
            report.warnings.push(warning);
            return report;
        }

        let old_value = self.config.parameter(parameter);
        let mut candidate = self.config.clone();
        if let Err(e) = candidate.set_parameter(parameter, value.clone()) {
            report.error = Some(e.to_string());
            return report;
        }

        let needs_restart = TrainingConfig::requires_restart(parameter)
            && self.state() != SessionState::Stopped;
        if needs_restart {
            report.warnings.push(format!(
                "parameter '{parameter}' requires restart; queued for the next start"
            ));
        }
        if validate_only {
            return report;
        }

        self.journal.push_rollback(self.config.clone());
        self.journal.record(
            if needs_restart {
                ChangeKind::QueuedForRestart
            } else {
                ChangeKind::Adjustment
            },
            parameter,
            old_value,
            Some(value),
            reason,
            "controller",
        );
        self.config = candidate;
        if !needs_restart {
            if let Some(orchestrator) = self.orchestrator.as_mut() {
                orchestrator.apply_config(&self.config);
            }
        }
        report.applied = true;
        info!(parameter, "configuration adjusted");
        report
    }

    /// Pops one level off the rollback stack and applies it.
    pub fn rollback(&mut self) -> ControlResult {
        let Some(previous) = self.journal.pop_rollback() else {
            return ControlError::NothingToRollBack.into();
        };
        self.journal.record(
            ChangeKind::Rollback,
            "ROLLBACK",
            serde_json::to_value(&self.config).ok(),
            serde_json::to_value(&previous).ok(),
            "operator rollback",
            "controller",
        );
        self.config = previous;
        if let Some(orchestrator) = self.orchestrator.as_mut() {
            orchestrator.apply_config(&self.config);
        }
        ControlResult::Success("configuration rolled back one level".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn workdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("caissa-ctrl-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn tiny_config() -> TrainingConfig {
        TrainingConfig {
            seed: Some(3),
            deterministic_mode: true,
            episodes: 3,
            batch_size: 8,
            updates_per_iteration: 1,
            hidden_layers: vec![8],
            replay_batch_size: 4,
            games_per_iteration: 1,
            parallel_games: 1,
            max_steps_per_game: 10,
            max_steps_per_episode: 10,
            evaluation_games: 1,
            checkpoint_interval: 1,
            exploration_rate: 1.0,
            ..TrainingConfig::default()
        }
    }

    fn controller(tag: &str) -> LifecycleController {
        LifecycleController::new(tiny_config(), workdir(tag))
    }

    // ============================================================================================
    // Lifecycle legality
    // ============================================================================================

    #[test]
    fn initial_state_is_stopped() {
        let controller = controller("init");
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[test]
    fn pause_from_stopped_is_rejected() {
        let mut controller = controller("pause-stopped");
        let result = controller.pause();
        assert!(!result.is_success());
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[test]
    fn start_pause_resume_stop() {
        let mut controller = controller("cycle");
        assert!(controller.start(None).is_success());
        assert_eq!(controller.state(), SessionState::Running);

        assert!(controller.pause().is_success());
        assert_eq!(controller.state(), SessionState::Paused);
        assert!(controller.session().unwrap().paused_time.is_some());

        assert!(controller.resume().is_success());
        assert_eq!(controller.state(), SessionState::Running);
        assert!(controller.session().unwrap().resumed_time.is_some());

        assert!(controller.stop().is_success());
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut controller = controller("idem");
        assert!(controller.stop().is_success());
        assert!(controller.stop().is_success());
    }

    #[test]
    fn resume_without_snapshot_fails() {
        let mut controller = controller("nosnap");
        controller.start(None);
        controller.pause();
        assert!(controller.resume().is_success());
        // Second resume has no snapshot and is not Paused anyway.
        assert!(!controller.resume().is_success());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut controller = controller("double");
        assert!(controller.start(None).is_success());
        assert!(!controller.start(None).is_success());
        controller.stop();
    }

    #[test]
    fn step_runs_to_completion() {
        let mut controller = controller("steps");
        controller.start(None);
        let result = controller.run_to_completion();
        assert!(result.is_success());
        assert_eq!(controller.state(), SessionState::Completed);
        // Completed -> stop -> Stopped is legal.
        assert!(controller.stop().is_success());
    }

    #[test]
    fn restart_reuses_last_config() {
        let mut controller = controller("restart");
        controller.start(None);
        assert!(controller.restart(None).is_success());
        assert_eq!(controller.state(), SessionState::Running);
        controller.stop();
    }

    #[test]
    fn invalid_config_moves_to_error_state() {
        let mut controller = controller("badcfg");
        let bad = TrainingConfig {
            parallel_games: 99,
            ..tiny_config()
        };
        let result = controller.start(Some(bad));
        assert!(!result.is_success());
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    // ============================================================================================
    // Adjustment and rollback
    // ============================================================================================

    #[test]
    fn adjust_applies_known_parameter() {
        let mut controller = controller("adjust");
        let report = controller.adjust(
            "exploration_rate",
            serde_json::json!(0.25),
            "tune exploration",
            false,
        );
        assert!(report.applied);
        assert!(report.error.is_none());
        assert_eq!(controller.config().exploration_rate, 0.25);
        assert_eq!(controller.journal().entries().len(), 1);
    }

    #[test]
    fn unknown_parameter_is_warning_with_journal_entry() {
        let mut controller = controller("unknown");
        let before = controller.config().clone();
        let report = controller.adjust("warp_factor", serde_json::json!(9), "typo", false);
        assert!(!report.applied);
        assert!(!report.warnings.is_empty());
        assert!(report.error.is_none());
        assert_eq!(controller.config(), &before);
        assert_eq!(
            controller.journal().entries()[0].kind,
            ChangeKind::UnknownParameter
        );
    }

    #[test]
    fn out_of_range_value_is_error() {
        let mut controller = controller("range");
        let report = controller.adjust(
            "exploration_rate",
            serde_json::json!(7.0),
            "fat fingers",
            false,
        );
        assert!(!report.applied);
        assert!(report.error.is_some());
    }

    #[test]
    fn validate_only_leaves_config_untouched() {
        let mut controller = controller("dry");
        let report = controller.adjust(
            "learning_rate",
            serde_json::json!(0.1),
            "dry run",
            true,
        );
        assert!(!report.applied);
        assert!(report.error.is_none());
        assert_eq!(controller.config().learning_rate, tiny_config().learning_rate);
        assert!(controller.journal().entries().is_empty());
    }

    #[test]
    fn restart_required_parameter_warns_while_running() {
        let mut controller = controller("needsrestart");
        controller.start(None);
        let report = controller.adjust(
            "hidden_layers",
            serde_json::json!([32, 16]),
            "bigger net",
            false,
        );
        assert!(report.applied);
        assert!(report.warnings.iter().any(|w| w.contains("restart")));
        assert_eq!(
            controller.journal().entries()[0].kind,
            ChangeKind::QueuedForRestart
        );
        controller.stop();
    }

    #[test]
    fn rollback_pops_one_level() {
        let mut controller = controller("rollback");
        controller.adjust("learning_rate", serde_json::json!(0.01), "first", false);
        controller.adjust("learning_rate", serde_json::json!(0.1), "second", false);
        assert_eq!(controller.config().learning_rate, 0.1);

        assert!(controller.rollback().is_success());
        assert_eq!(controller.config().learning_rate, 0.01);
        assert!(controller.rollback().is_success());
        assert_eq!(controller.config().learning_rate, tiny_config().learning_rate);
        assert!(!controller.rollback().is_success());

        let kinds: Vec<ChangeKind> = controller
            .journal()
            .entries()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ChangeKind::Adjustment,
                ChangeKind::Adjustment,
                ChangeKind::Rollback,
                ChangeKind::Rollback,
            ]
        );
        assert_eq!(controller.journal().entries()[2].parameter, "ROLLBACK");
    }
}
