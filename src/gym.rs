use serde::{Deserialize, Serialize};

pub mod action;
pub mod env;
pub mod reward;

pub use action::ActionSpace;
pub use env::{ChessEnv, Env, StepResult};
pub use reward::{AdjudicationConfig, RewardConfig};

/// Scalar reward for one step, in the environment's own units.
///
/// Terminal rewards come straight from [`RewardConfig`]; shaping terms are
/// bounded by construction so that the sum over an episode stays comparable
/// across configurations.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)]
pub struct Reward(pub f64);

impl Reward {
    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }
}

impl From<f64> for Reward {
    fn from(value: f64) -> Self {
        Reward(value)
    }
}

impl From<Reward> for f64 {
    fn from(reward: Reward) -> Self {
        reward.0
    }
}

impl std::ops::Add for Reward {
    type Output = Reward;

    fn add(self, rhs: Reward) -> Reward {
        Reward(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Reward {
    fn add_assign(&mut self, rhs: Reward) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Reward {
    type Output = Reward;

    fn sub(self, rhs: Reward) -> Reward {
        Reward(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Reward {
    type Output = Reward;

    fn neg(self) -> Reward {
        Reward(-self.0)
    }
}

impl std::iter::Sum for Reward {
    fn sum<I: Iterator<Item = Reward>>(rewards: I) -> Reward {
        Reward(rewards.map(|r| r.0).sum())
    }
}

/// One recorded experience step `(s, a, r, s', done)`, immutable once emitted.
///
/// Produced by the self-play engine from the mover's perspective, stored in
/// the replay buffer, and consumed by the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Vec<f64>,
    pub action: usize,
    pub reward: f64,
    pub next_state: Vec<f64>,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Transition {
    pub fn new(state: Vec<f64>, action: usize, reward: f64, next_state: Vec<f64>, done: bool) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
            metadata: None,
        }
    }
}

/// Lifecycle status of a game environment.
///
/// ```md
/// Current State                        | Action  | Next State  | Notes
/// -------------------------------------|---------|-------------|--------------------------
/// `Ready`                              | reset() | Running     | First game starts
/// `Running` (game continues)           | step()  | Running     | Ply applied
/// `Running` (terminal position)        | step()  | GameOver    | Mate / stalemate / draw
/// `GameOver` / `Running`               | reset() | Running     | Next game starts
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// Initial state. The environment is waiting for `reset()`.
    Ready,

    /// A game is active and the environment accepts `step()` calls.
    Running,

    /// The active game has reached a terminal position.
    GameOver,
}

impl EnvStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_game_over(&self) -> bool {
        matches!(self, Self::GameOver)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    InProgress,
    /// The game ended through the rules of chess.
    Terminated,
    /// The caller cut the game short (step limit); the environment itself
    /// never emits this.
    Truncated,
}

impl StepOutcome {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_terminated() || self.is_truncated()
    }
}
