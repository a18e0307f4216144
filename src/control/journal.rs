use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::config::TrainingConfig;

/// Classification of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ChangeKind {
    Adjustment,
    Rollback,
    UnknownParameter,
    QueuedForRestart,
}

/// Append-only record of one configuration event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChange {
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
    pub parameter: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub reason: String,
    pub applied_by: String,
}

/// Append-only configuration journal plus a bounded LIFO stack of prior
/// configurations for rollback. The journal records every change and every
/// rollback as distinct entries; the stack only ever shrinks through
/// [`ConfigJournal::pop_rollback`].
#[derive(Debug, Default)]
pub struct ConfigJournal {
    entries: Vec<ConfigChange>,
    rollback_stack: Vec<TrainingConfig>,
    max_rollback_history: usize,
}

impl ConfigJournal {
    pub fn new(max_rollback_history: usize) -> Self {
        Self {
            entries: Vec::new(),
            rollback_stack: Vec::new(),
            max_rollback_history: max_rollback_history.max(1),
        }
    }

    pub fn entries(&self) -> &[ConfigChange] {
        &self.entries
    }

    pub fn rollback_depth(&self) -> usize {
        self.rollback_stack.len()
    }

    pub fn record(
        &mut self,
        kind: ChangeKind,
        parameter: &str,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        reason: &str,
        applied_by: &str,
    ) {
        self.entries.push(ConfigChange {
            timestamp: Utc::now(),
            kind,
            parameter: parameter.to_string(),
            old_value,
            new_value,
            reason: reason.to_string(),
            applied_by: applied_by.to_string(),
        });
    }

    /// Pushes the pre-change configuration; the stack is bounded, dropping
    /// its oldest entry when full.
    pub fn push_rollback(&mut self, config: TrainingConfig) {
        self.rollback_stack.push(config);
        if self.rollback_stack.len() > self.max_rollback_history {
            self.rollback_stack.remove(0);
        }
    }

    pub fn pop_rollback(&mut self) -> Option<TrainingConfig> {
        self.rollback_stack.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_is_append_only() {
        let mut journal = ConfigJournal::new(5);
        journal.record(
            ChangeKind::Adjustment,
            "learning_rate",
            Some(serde_json::json!(0.001)),
            Some(serde_json::json!(0.01)),
            "operator request",
            "cli",
        );
        journal.record(ChangeKind::Rollback, "ROLLBACK", None, None, "undo", "cli");
        assert_eq!(journal.entries().len(), 2);
        assert_eq!(journal.entries()[0].kind, ChangeKind::Adjustment);
        assert_eq!(journal.entries()[1].parameter, "ROLLBACK");
    }

    #[test]
    fn rollback_stack_is_bounded_lifo() {
        let mut journal = ConfigJournal::new(2);
        for lr in [0.1, 0.2, 0.3] {
            journal.push_rollback(TrainingConfig {
                learning_rate: lr,
                ..TrainingConfig::default()
            });
        }
        assert_eq!(journal.rollback_depth(), 2);
        assert_eq!(journal.pop_rollback().unwrap().learning_rate, 0.3);
        assert_eq!(journal.pop_rollback().unwrap().learning_rate, 0.2);
        assert!(journal.pop_rollback().is_none());
    }
}
