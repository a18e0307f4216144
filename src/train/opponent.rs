use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tracing::{debug, info};

use crate::agent::{Agent, AgentSnapshot};
use crate::checkpoint::CheckpointManager;
use crate::error::CaissaResult;

/// How the self-play adversary evolves between iterations.
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
pub enum OpponentStrategy {
    /// Overwrite the opponent with the main agent after every iteration.
    #[default]
    CopyMain,

    /// Periodically reload an older checkpoint into the opponent.
    Historical,

    /// Never update.
    Fixed,

    /// Copy the main agent only once it beats the opponent convincingly.
    Adaptive,
}

/// Owns the opponent snapshot and applies the configured update strategy.
///
/// The opponent is always an immutable parameter snapshot; no learning agent
/// ever plays the adversary role directly.
pub struct OpponentManager {
    strategy: OpponentStrategy,
    update_frequency: usize,
    adaptive_threshold: f64,
    snapshot: AgentSnapshot,
}

impl OpponentManager {
    pub fn new(
        strategy: OpponentStrategy,
        update_frequency: usize,
        adaptive_threshold: f64,
        initial: AgentSnapshot,
    ) -> Self {
        Self {
            strategy,
            update_frequency: update_frequency.max(1),
            adaptive_threshold,
            snapshot: initial,
        }
    }

    pub fn strategy(&self) -> OpponentStrategy {
        self.strategy
    }

    pub fn snapshot(&self) -> &AgentSnapshot {
        &self.snapshot
    }

    /// Applies the strategy after an iteration. `win_rate` is the main
    /// agent's evaluation win rate against the current opponent; `scratch` is
    /// a same-shaped agent used to materialize historical checkpoints.
    ///
    /// Returns whether the opponent changed.
    pub fn maybe_update(
        &mut self,
        iteration: u64,
        main: &dyn Agent,
        win_rate: f64,
        checkpoints: &CheckpointManager,
        scratch: &mut dyn Agent,
    ) -> CaissaResult<bool> {
        match self.strategy {
            OpponentStrategy::Fixed => Ok(false),
            OpponentStrategy::CopyMain => {
                self.snapshot = main.snapshot();
                debug!(iteration, "opponent refreshed from main agent");
                Ok(true)
            }
            OpponentStrategy::Adaptive => {
                if win_rate > self.adaptive_threshold {
                    self.snapshot = main.snapshot();
                    info!(
                        iteration,
                        win_rate, "adaptive opponent update: main agent promoted"
                    );
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            OpponentStrategy::Historical => {
                if iteration == 0 || iteration % self.update_frequency as u64 != 0 {
                    return Ok(false);
                }
                // Prefer the newest checkpoint older than the latest one, so
                // the opponent lags the main line by at least one version.
                let versions: Vec<u64> =
                    checkpoints.list().iter().map(|r| r.version).collect();
                let target = match versions.len() {
                    0 => return Ok(false),
                    1 => versions[0],
                    n => versions[n - 2],
                };
                let record = checkpoints
                    .get(target)
                    .expect("listed version is present");
                checkpoints.load(record, scratch)?;
                self.snapshot = scratch.snapshot();
                info!(iteration, version = target, "historical opponent loaded");
                Ok(true)
            }
        }
    }
}
