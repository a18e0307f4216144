use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::agent::AgentMetrics;
use crate::config::TrainingConfig;
use crate::train::orchestrator::OrchestratorState;

/// Lifecycle of one training session.
///
/// ```md
/// Stopped ──start──▶ Starting ──init ok──▶ Running
///    ▲                             │
///    │                             ├──pause──▶ Paused ──resume──▶ Running
///    │                             ├──stop──▶ Stopped
///    │                             └──error──▶ Error ──stop──▶ Stopped
///    └──restart (= stop then start)──────────────────────────────┘
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr, Default,
)]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Running,
    Paused,
    Completed,
    Error,
}

impl SessionState {
    /// Whether `self ──▶ next` appears in the lifecycle diagram.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Running, Paused)
                | (Running, Stopped)
                | (Running, Completed)
                | (Running, Error)
                | (Paused, Running)
                | (Paused, Stopped)
                | (Completed, Stopped)
                | (Error, Stopped)
        )
    }
}

/// One training session; exactly one is current per controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: String,
    pub name: String,
    pub config: TrainingConfig,
    pub state: SessionState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub paused_time: Option<DateTime<Utc>>,
    pub resumed_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TrainingSession {
    pub fn new(config: TrainingConfig) -> Self {
        let start_time = Utc::now();
        let id = format!("session-{}", start_time.format("%Y%m%d%H%M%S%3f"));
        let name = config.name.clone().unwrap_or_else(|| id.clone());
        Self {
            id,
            name,
            config,
            state: SessionState::Starting,
            start_time,
            end_time: None,
            paused_time: None,
            resumed_time: None,
            error: None,
        }
    }
}

/// State captured on pause and consumed on resume; at most one live snapshot
/// exists per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub training_state: OrchestratorState,
    pub configuration: TrainingConfig,
    pub controller_state: BTreeMap<String, serde_json::Value>,
    pub metrics_snapshot: AgentMetrics,
    pub iteration: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use SessionState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Error.can_transition_to(Stopped));
    }

    #[test]
    fn illegal_transitions() {
        use SessionState::*;
        assert!(!Stopped.can_transition_to(Paused));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Paused));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Error.can_transition_to(Running));
    }

    #[test]
    fn new_session_is_starting() {
        let session = TrainingSession::new(TrainingConfig::default());
        assert_eq!(session.state, SessionState::Starting);
        assert!(session.end_time.is_none());
        assert!(session.id.starts_with("session-"));
    }
}
