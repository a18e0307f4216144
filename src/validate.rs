use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};
use tracing::warn;

use crate::agent::{AgentMetrics, PolicyUpdateResult};

/// Per-update numerical and training-health checks.
///
/// Each enabled check contributes at most one issue per call; history is
/// bounded FIFO. Raising a threshold can only reduce the number of issues of
/// that kind, and disabling a check suppresses its kind entirely.
#[derive(Debug)]
pub struct TrainingValidator {
    config: ValidatorConfig,
    history: VecDeque<ValidationRecord>,
    previous_loss: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub exploding_gradient_threshold: f64,
    pub vanishing_gradient_threshold: f64,
    pub entropy_collapse_threshold: f64,
    pub exploration_threshold: f64,
    pub overestimation_threshold: f64,
    pub loss_explosion_threshold: f64,
    pub max_history: usize,
    pub checks: ValidatorChecks,
}

/// Per-check enable flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorChecks {
    pub numerical_stability: bool,
    pub exploding_gradients: bool,
    pub vanishing_gradients: bool,
    pub policy_collapse: bool,
    pub insufficient_exploration: bool,
    pub value_overestimation: bool,
    pub loss_explosion: bool,
}

impl Default for ValidatorChecks {
    fn default() -> Self {
        Self {
            numerical_stability: true,
            exploding_gradients: true,
            vanishing_gradients: true,
            policy_collapse: true,
            insufficient_exploration: true,
            value_overestimation: true,
            loss_explosion: true,
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            exploding_gradient_threshold: 10.0,
            vanishing_gradient_threshold: 1e-6,
            entropy_collapse_threshold: 0.1,
            exploration_threshold: 0.01,
            overestimation_threshold: 100.0,
            loss_explosion_threshold: 10.0,
            max_history: 100,
            checks: ValidatorChecks::default(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, IntoStaticStr,
)]
pub enum IssueKind {
    NumericalInstability,
    ExplodingGradients,
    VanishingGradients,
    PolicyCollapse,
    InsufficientExploration,
    ValueOverestimation,
    LossExplosion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub episode: u64,
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub before_metrics: AgentMetrics,
    pub after_metrics: AgentMetrics,
    pub update: PolicyUpdateResult,
    pub timestamp: DateTime<Utc>,
}

impl TrainingValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            previous_loss: None,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn history(&self) -> impl Iterator<Item = &ValidationRecord> {
        self.history.iter()
    }

    pub fn last(&self) -> Option<&ValidationRecord> {
        self.history.back()
    }

    /// Runs every enabled check against one update.
    pub fn validate_update(
        &mut self,
        before: &AgentMetrics,
        after: &AgentMetrics,
        update: &PolicyUpdateResult,
        episode: u64,
    ) -> ValidationRecord {
        let checks = &self.config.checks;
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        if checks.numerical_stability
            && (!update.loss.is_finite() || !update.gradient_norm.is_finite())
        {
            let value = if update.loss.is_finite() {
                update.gradient_norm
            } else {
                update.loss
            };
            issues.push(ValidationIssue {
                kind: IssueKind::NumericalInstability,
                severity: Severity::High,
                message: "loss or gradient norm is NaN or infinite".to_string(),
                value,
                threshold: None,
            });
        }

        if checks.exploding_gradients
            && update.gradient_norm.is_finite()
            && update.gradient_norm > self.config.exploding_gradient_threshold
        {
            issues.push(ValidationIssue {
                kind: IssueKind::ExplodingGradients,
                severity: Severity::High,
                message: format!("gradient norm {:.3e} exceeds threshold", update.gradient_norm),
                value: update.gradient_norm,
                threshold: Some(self.config.exploding_gradient_threshold),
            });
        }

        if checks.vanishing_gradients
            && update.gradient_norm.is_finite()
            && update.gradient_norm < self.config.vanishing_gradient_threshold
        {
            issues.push(ValidationIssue {
                kind: IssueKind::VanishingGradients,
                severity: Severity::Medium,
                message: format!("gradient norm {:.3e} is vanishing", update.gradient_norm),
                value: update.gradient_norm,
                threshold: Some(self.config.vanishing_gradient_threshold),
            });
        }

        if checks.policy_collapse
            && update.policy_entropy.is_finite()
            && update.policy_entropy < self.config.entropy_collapse_threshold
        {
            issues.push(ValidationIssue {
                kind: IssueKind::PolicyCollapse,
                severity: Severity::High,
                message: format!("policy entropy {:.4} has collapsed", update.policy_entropy),
                value: update.policy_entropy,
                threshold: Some(self.config.entropy_collapse_threshold),
            });
        }

        if checks.insufficient_exploration
            && after.exploration_rate < self.config.exploration_threshold
        {
            issues.push(ValidationIssue {
                kind: IssueKind::InsufficientExploration,
                severity: Severity::Medium,
                message: format!("exploration rate {:.4} is too low", after.exploration_rate),
                value: after.exploration_rate,
                threshold: Some(self.config.exploration_threshold),
            });
        }

        if checks.value_overestimation {
            if let Some(mean_q) = update.mean_q {
                if mean_q.is_finite() && mean_q > self.config.overestimation_threshold {
                    issues.push(ValidationIssue {
                        kind: IssueKind::ValueOverestimation,
                        severity: Severity::Medium,
                        message: format!("mean Q-value {mean_q:.3} looks overestimated"),
                        value: mean_q,
                        threshold: Some(self.config.overestimation_threshold),
                    });
                }
            }
        }

        if checks.loss_explosion {
            if let (Some(previous), true) = (self.previous_loss, update.loss.is_finite()) {
                let delta = update.loss - previous;
                if delta > self.config.loss_explosion_threshold {
                    issues.push(ValidationIssue {
                        kind: IssueKind::LossExplosion,
                        severity: Severity::High,
                        message: format!("loss jumped by {delta:.3} in one update"),
                        value: delta,
                        threshold: Some(self.config.loss_explosion_threshold),
                    });
                }
            }
        }
        if update.loss.is_finite() {
            self.previous_loss = Some(update.loss);
        }

        if after.recent_avg_reward < before.recent_avg_reward {
            warnings.push(format!(
                "recent average reward declined: {:.4} -> {:.4}",
                before.recent_avg_reward, after.recent_avg_reward
            ));
        }

        let recommendations = issues
            .iter()
            .flat_map(|issue| recommendations_for(issue.kind))
            .copied()
            .map(str::to_string)
            .collect();
        let is_valid = !issues.iter().any(|i| i.severity == Severity::High);
        if !is_valid {
            warn!(episode, issue_count = issues.len(), "training update failed validation");
        }

        let record = ValidationRecord {
            episode,
            is_valid,
            issues,
            warnings,
            recommendations,
            before_metrics: before.clone(),
            after_metrics: after.clone(),
            update: *update,
            timestamp: Utc::now(),
        };
        self.history.push_back(record.clone());
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }
        record
    }

    /// Count of issues of one kind over the retained history.
    pub fn issue_count(&self, kind: IssueKind) -> usize {
        self.history
            .iter()
            .flat_map(|r| r.issues.iter())
            .filter(|i| i.kind == kind)
            .count()
    }
}

impl Default for TrainingValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

/// Fixed advice per issue kind.
fn recommendations_for(kind: IssueKind) -> &'static [&'static str] {
    match kind {
        IssueKind::NumericalInstability => &[
            "reduce the learning rate",
            "check reward scaling for extreme magnitudes",
        ],
        IssueKind::ExplodingGradients => &[
            "apply gradient clipping",
            "reduce the learning rate",
        ],
        IssueKind::VanishingGradients => &[
            "increase the learning rate",
            "check weight initialization",
            "consider a different activation function",
        ],
        IssueKind::PolicyCollapse => &[
            "increase the exploration rate",
            "add an entropy bonus to the loss",
        ],
        IssueKind::InsufficientExploration => &[
            "raise the exploration rate floor",
            "slow down exploration decay",
        ],
        IssueKind::ValueOverestimation => &[
            "sync the target network more frequently",
            "consider double Q-learning",
        ],
        IssueKind::LossExplosion => &[
            "reduce the learning rate",
            "clear the replay buffer of stale transitions",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================================================
    // Helper Functions
    // ============================================================================================

    fn metrics(exploration_rate: f64) -> AgentMetrics {
        AgentMetrics {
            exploration_rate,
            ..AgentMetrics::default()
        }
    }

    fn update(loss: f64, gradient_norm: f64, policy_entropy: f64) -> PolicyUpdateResult {
        PolicyUpdateResult {
            loss,
            gradient_norm,
            policy_entropy,
            mean_q: None,
            mean_target: None,
        }
    }

    fn healthy_update() -> PolicyUpdateResult {
        update(1.0, 0.5, 0.8)
    }

    fn validate(validator: &mut TrainingValidator, u: PolicyUpdateResult) -> ValidationRecord {
        validator.validate_update(&metrics(0.1), &metrics(0.1), &u, 0)
    }

    // ============================================================================================
    // Individual checks
    // ============================================================================================

    #[test]
    fn healthy_update_is_valid() {
        let mut validator = TrainingValidator::default();
        let record = validate(&mut validator, healthy_update());
        assert!(record.is_valid);
        assert!(record.issues.is_empty());
        assert!(record.recommendations.is_empty());
    }

    #[test]
    fn nan_loss_is_high_severity() {
        let mut validator = TrainingValidator::default();
        let record = validate(&mut validator, update(f64::NAN, 0.5, 0.8));
        assert!(!record.is_valid);
        assert_eq!(record.issues[0].kind, IssueKind::NumericalInstability);
        assert_eq!(record.issues[0].severity, Severity::High);
    }

    #[test]
    fn exploding_gradient_detected_with_advice() {
        let mut validator = TrainingValidator::default();
        let record = validate(&mut validator, update(1.0, 1e3, 0.5));
        let issue = record
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::ExplodingGradients)
            .expect("exploding gradient issue");
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.threshold, Some(10.0));
        assert!(
            record
                .recommendations
                .iter()
                .any(|r| r.contains("gradient clipping"))
        );
    }

    #[test]
    fn vanishing_gradient_is_medium() {
        let mut validator = TrainingValidator::default();
        let record = validate(&mut validator, update(1.0, 1e-9, 0.5));
        let issue = record
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::VanishingGradients)
            .unwrap();
        assert_eq!(issue.severity, Severity::Medium);
        assert!(record.is_valid, "medium issues alone keep the update valid");
    }

    #[test]
    fn policy_collapse_detected() {
        let mut validator = TrainingValidator::default();
        let record = validate(&mut validator, update(1.0, 0.5, 0.01));
        assert!(record.issues.iter().any(|i| i.kind == IssueKind::PolicyCollapse));
        assert!(!record.is_valid);
    }

    #[test]
    fn insufficient_exploration_detected() {
        let mut validator = TrainingValidator::default();
        let record =
            validator.validate_update(&metrics(0.001), &metrics(0.001), &healthy_update(), 0);
        assert!(
            record
                .issues
                .iter()
                .any(|i| i.kind == IssueKind::InsufficientExploration)
        );
    }

    #[test]
    fn overestimation_needs_q_stats() {
        let mut validator = TrainingValidator::default();
        let mut u = healthy_update();
        let record = validate(&mut validator, u);
        assert!(record.issues.is_empty());

        u.mean_q = Some(500.0);
        let record = validate(&mut validator, u);
        assert!(
            record
                .issues
                .iter()
                .any(|i| i.kind == IssueKind::ValueOverestimation)
        );
    }

    #[test]
    fn loss_explosion_compares_consecutive_updates() {
        let mut validator = TrainingValidator::default();
        let first = validate(&mut validator, update(1.0, 0.5, 0.8));
        assert!(first.issues.is_empty(), "first update has no baseline");
        let second = validate(&mut validator, update(50.0, 0.5, 0.8));
        assert!(second.issues.iter().any(|i| i.kind == IssueKind::LossExplosion));
    }

    // ============================================================================================
    // Monotonicity
    // ============================================================================================

    #[test]
    fn disabling_a_check_suppresses_its_kind() {
        let config = ValidatorConfig {
            checks: ValidatorChecks {
                exploding_gradients: false,
                ..ValidatorChecks::default()
            },
            ..ValidatorConfig::default()
        };
        let mut validator = TrainingValidator::new(config);
        let record = validate(&mut validator, update(1.0, 1e6, 0.5));
        assert!(
            record
                .issues
                .iter()
                .all(|i| i.kind != IssueKind::ExplodingGradients)
        );
    }

    #[test]
    fn raising_threshold_reduces_issue_count() {
        let run = |threshold: f64| {
            let config = ValidatorConfig {
                exploding_gradient_threshold: threshold,
                ..ValidatorConfig::default()
            };
            let mut validator = TrainingValidator::new(config);
            for norm in [5.0, 15.0, 50.0, 200.0] {
                validate(&mut validator, update(1.0, norm, 0.5));
            }
            validator.issue_count(IssueKind::ExplodingGradients)
        };
        assert!(run(10.0) >= run(100.0));
        assert_eq!(run(1000.0), 0);
    }

    #[test]
    fn history_is_bounded_fifo() {
        let config = ValidatorConfig {
            max_history: 5,
            ..ValidatorConfig::default()
        };
        let mut validator = TrainingValidator::new(config);
        for episode in 0..12 {
            validator.validate_update(&metrics(0.1), &metrics(0.1), &healthy_update(), episode);
        }
        let episodes: Vec<u64> = validator.history().map(|r| r.episode).collect();
        assert_eq!(episodes, vec![7, 8, 9, 10, 11]);
    }
}
