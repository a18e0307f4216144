use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::AgentSnapshot;
use crate::chess::Color;
use crate::error::{CaissaResult, EnvError, SystemError};
use crate::gym::{ChessEnv, Env, Transition};
use crate::seed::SeedManager;

/// Self-play batch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfPlayConfig {
    pub games_per_iteration: usize,
    pub max_concurrent_games: usize,
    pub max_steps_per_game: usize,
    /// Alternate the main agent's color by game index; otherwise main always
    /// plays White.
    pub alternate_colors: bool,
    /// Render a progress bar while the batch runs.
    pub show_progress: bool,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            games_per_iteration: 20,
            max_concurrent_games: 4,
            max_steps_per_game: 200,
            alternate_colors: true,
            show_progress: false,
        }
    }
}

impl SelfPlayConfig {
    pub fn validate(&self) -> CaissaResult<()> {
        if self.games_per_iteration == 0 {
            return Err(EnvError::InvalidConfig("games_per_iteration must be positive".into()).into());
        }
        if !(1..=8).contains(&self.max_concurrent_games) {
            return Err(
                EnvError::InvalidConfig("max_concurrent_games must be in 1..=8".into()).into(),
            );
        }
        if self.max_steps_per_game == 0 {
            return Err(EnvError::InvalidConfig("max_steps_per_game must be positive".into()).into());
        }
        Ok(())
    }
}

/// How one self-play game ended, from the main agent's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameOutcome {
    MainWin,
    MainLoss,
    Draw,
    /// The ply cap cut the game short; penalty attribution is the
    /// orchestrator's job.
    StepLimit,
    /// A cooperative stop ended the game before a verdict.
    Aborted,
}

impl GameOutcome {
    pub fn key(&self) -> &'static str {
        match self {
            GameOutcome::MainWin => "main_win",
            GameOutcome::MainLoss => "main_loss",
            GameOutcome::Draw => "draw",
            GameOutcome::StepLimit => "step_limit",
            GameOutcome::Aborted => "aborted",
        }
    }
}

/// One finished game as produced by a worker.
#[derive(Debug, Clone)]
pub struct GameReport {
    pub game_index: usize,
    pub main_color: Color,
    pub outcome: GameOutcome,
    pub plies: u32,
    pub transitions: Vec<Transition>,
}

/// Aggregate of one self-play iteration.
#[derive(Debug, Clone)]
pub struct SelfPlayReport {
    pub total_games: usize,
    pub total_experiences: usize,
    pub average_game_length: f64,
    pub outcomes: BTreeMap<&'static str, u64>,
    pub step_limit_games: Vec<usize>,
    pub experiences: Vec<Transition>,
}

/// Runs batches of games between the main agent and an opponent snapshot.
///
/// Up to `max_concurrent_games` rayon workers run at once; each owns its
/// environment clone and a per-game generator derived from the data stream by
/// `(iteration, game_index)`, so the transition set of an iteration is a pure
/// function of the master seed. Completed games flow back through an MPSC
/// channel and are appended in game-index order.
pub struct SelfPlayEngine {
    config: SelfPlayConfig,
    pool: rayon::ThreadPool,
    stop: Arc<AtomicBool>,
}

impl SelfPlayEngine {
    pub fn new(config: SelfPlayConfig) -> CaissaResult<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrent_games)
            .thread_name(|i| format!("selfplay-{i}"))
            .build()
            .map_err(|e| SystemError::InvariantViolation(e.to_string()))?;
        Ok(Self {
            config,
            pool,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SelfPlayConfig {
        &self.config
    }

    /// Cooperative stop: workers finish the current ply and emit nothing
    /// further.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Plays one iteration's worth of games.
    #[tracing::instrument(skip_all, fields(iteration))]
    pub fn run_iteration(
        &self,
        iteration: u64,
        main: &AgentSnapshot,
        opponent: &AgentSnapshot,
        env_prototype: &ChessEnv,
        seeds: &SeedManager,
    ) -> CaissaResult<SelfPlayReport> {
        let total = self.config.games_per_iteration;
        let progress = if self.config.show_progress {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                    .map_err(|e| SystemError::InvariantViolation(e.to_string()))?,
            );
            bar.set_message(format!("self-play iteration {iteration}"));
            Some(bar)
        } else {
            None
        };

        // Derive every per-game seed up front; workers stay read-only.
        let game_seeds: Vec<u64> = (0..total)
            .map(|i| seeds.subseed("data", iteration, i as u64))
            .collect::<CaissaResult<_>>()?;

        let (sender, receiver) = channel::unbounded::<CaissaResult<GameReport>>();
        let stop = Arc::clone(&self.stop);
        let config = self.config;

        self.pool.scope(|scope| {
            for (game_index, &seed) in game_seeds.iter().enumerate() {
                let sender = sender.clone();
                let stop = Arc::clone(&stop);
                let progress = progress.clone();
                scope.spawn(move |_| {
                    let report = play_game(
                        game_index,
                        seed,
                        &config,
                        main,
                        opponent,
                        env_prototype.clone(),
                        &stop,
                    );
                    if let Some(bar) = progress {
                        bar.inc(1);
                    }
                    // A disconnected receiver means the iteration already
                    // failed; dropping the report is fine.
                    let _ = sender.send(report);
                });
            }
        });
        drop(sender);
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        let mut reports: Vec<GameReport> = Vec::with_capacity(total);
        for received in receiver.iter() {
            reports.push(received?);
        }
        reports.sort_by_key(|r| r.game_index);

        let mut outcomes: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut step_limit_games = Vec::new();
        let mut experiences = Vec::new();
        let mut total_plies = 0u64;
        for report in &reports {
            *outcomes.entry(report.outcome.key()).or_insert(0) += 1;
            if report.outcome == GameOutcome::StepLimit {
                step_limit_games.push(report.game_index);
            }
            total_plies += report.plies as u64;
            experiences.extend(report.transitions.iter().cloned());
        }
        let finished = reports.len();
        info!(
            iteration,
            games = finished,
            experiences = experiences.len(),
            "self-play iteration finished"
        );

        Ok(SelfPlayReport {
            total_games: finished,
            total_experiences: experiences.len(),
            average_game_length: if finished > 0 {
                total_plies as f64 / finished as f64
            } else {
                0.0
            },
            outcomes,
            step_limit_games,
            experiences,
        })
    }
}

/// Plays a single game to completion, the step limit, or a cooperative stop.
fn play_game(
    game_index: usize,
    seed: u64,
    config: &SelfPlayConfig,
    main: &AgentSnapshot,
    opponent: &AgentSnapshot,
    mut env: ChessEnv,
    stop: &AtomicBool,
) -> CaissaResult<GameReport> {
    let mut rng = StdRng::seed_from_u64(seed);
    let main_color = if config.alternate_colors && game_index % 2 == 1 {
        Color::Black
    } else {
        Color::White
    };

    let mut state = env.reset();
    let mut transitions: Vec<Transition> = Vec::new();
    let mut movers: Vec<Color> = Vec::new();
    let mut outcome = GameOutcome::StepLimit;
    let mut plies = 0u32;

    for _ in 0..config.max_steps_per_game {
        if stop.load(Ordering::Relaxed) {
            outcome = GameOutcome::Aborted;
            break;
        }
        let mover = env.side_to_move();
        let valid = env.valid_actions();
        if valid.is_empty() {
            break;
        }
        let snapshot = if mover == main_color { main } else { opponent };
        let action = snapshot.select_action(&state, &valid, &mut rng)?;
        let result = env.step(action)?;
        plies += 1;

        let done = result.done();
        transitions.push(Transition::new(
            state,
            action,
            result.reward.0,
            result.next_state.clone(),
            done,
        ));
        movers.push(mover);
        state = result.next_state;

        if done {
            let status = env.game_status();
            // The mover that did NOT make the final move learns its terminal
            // reward retroactively.
            patch_loser_transition(&mut transitions, &movers, &env, mover);
            outcome = match status.winner() {
                Some(winner) if winner == main_color => GameOutcome::MainWin,
                Some(_) => GameOutcome::MainLoss,
                None => GameOutcome::Draw,
            };
            break;
        }
    }
    debug!(game_index, ?outcome, plies, "game finished");

    Ok(GameReport {
        game_index,
        main_color,
        outcome,
        plies,
        transitions,
    })
}

/// Rewrites the last transition of the side that did not move last, so both
/// perspectives see the terminal verdict.
fn patch_loser_transition(
    transitions: &mut [Transition],
    movers: &[Color],
    env: &ChessEnv,
    final_mover: Color,
) {
    let status = env.game_status();
    let other = final_mover.opposite();
    if let Some(index) = movers.iter().rposition(|&m| m == other) {
        let reward = env.reward_config().terminal_reward(status, other);
        transitions[index].reward = reward;
        transitions[index].done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentKind, make_agent};
    use crate::gym::env::STATE_FEATURES;
    use crate::gym::{ActionSpace, AdjudicationConfig, RewardConfig};
    use crate::nn::NetworkConfig;

    // ============================================================================================
    // Helper Functions
    // ============================================================================================

    fn seeds(master: u64) -> SeedManager {
        let manager = SeedManager::new();
        manager.set_master(master).unwrap();
        manager
    }

    fn snapshot(seeds: &SeedManager, exploration: f64) -> AgentSnapshot {
        let agent = make_agent(
            AgentKind::Dqn,
            NetworkConfig {
                input_size: STATE_FEATURES,
                hidden_layers: vec![16],
                output_size: ActionSpace::SIZE,
                ..NetworkConfig::default()
            },
            8,
            exploration,
            seeds,
        )
        .unwrap();
        agent.snapshot()
    }

    fn engine(games: usize, parallel: usize) -> SelfPlayEngine {
        SelfPlayEngine::new(SelfPlayConfig {
            games_per_iteration: games,
            max_concurrent_games: parallel,
            max_steps_per_game: 40,
            alternate_colors: true,
            show_progress: false,
        })
        .unwrap()
    }

    fn env() -> ChessEnv {
        ChessEnv::new(RewardConfig::default(), AdjudicationConfig::default()).unwrap()
    }

    // ============================================================================================
    // Behaviour
    // ============================================================================================

    #[test]
    fn config_bounds_are_enforced() {
        assert!(
            SelfPlayConfig {
                max_concurrent_games: 0,
                ..SelfPlayConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            SelfPlayConfig {
                max_concurrent_games: 9,
                ..SelfPlayConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(SelfPlayConfig::default().validate().is_ok());
    }

    #[test]
    fn iteration_produces_expected_game_count() {
        let seeds = seeds(11);
        let main = snapshot(&seeds, 0.5);
        let opponent = main.clone();
        let engine = engine(4, 2);
        let report = engine
            .run_iteration(0, &main, &opponent, &env(), &seeds)
            .unwrap();
        assert_eq!(report.total_games, 4);
        assert!(report.total_experiences > 0);
        assert!(report.average_game_length > 0.0);
        assert_eq!(report.outcomes.values().sum::<u64>(), 4);
    }

    #[test]
    fn transitions_are_deterministic_for_fixed_seed() {
        let run = || {
            let seeds = seeds(12345);
            let main = snapshot(&seeds, 0.5);
            let opponent = main.clone();
            let engine = engine(3, 3);
            engine
                .run_iteration(7, &main, &opponent, &env(), &seeds)
                .unwrap()
                .experiences
                .iter()
                .map(|t| (t.action, t.reward.to_bits()))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn different_iterations_differ() {
        let seeds = seeds(5);
        let main = snapshot(&seeds, 1.0);
        let opponent = main.clone();
        let engine = engine(2, 1);
        let a = engine
            .run_iteration(0, &main, &opponent, &env(), &seeds)
            .unwrap();
        let b = engine
            .run_iteration(1, &main, &opponent, &env(), &seeds)
            .unwrap();
        let key = |r: &SelfPlayReport| {
            r.experiences
                .iter()
                .map(|t| t.action)
                .collect::<Vec<_>>()
        };
        assert_ne!(key(&a), key(&b));
    }

    #[test]
    fn stop_flag_aborts_games() {
        let seeds = seeds(3);
        let main = snapshot(&seeds, 1.0);
        let opponent = main.clone();
        let engine = engine(2, 1);
        engine.stop();
        let report = engine
            .run_iteration(0, &main, &opponent, &env(), &seeds)
            .unwrap();
        assert_eq!(report.outcomes.get("aborted"), Some(&2));
        assert_eq!(report.total_experiences, 0);
        engine.clear_stop();
        assert!(!engine.stop_requested());
    }

    #[test]
    fn terminal_games_patch_both_perspectives() {
        // Random play on a tiny board cap rarely mates, so force many games
        // and only assert on those that finished with a verdict.
        let seeds = seeds(99);
        let main = snapshot(&seeds, 1.0);
        let opponent = main.clone();
        let engine = SelfPlayEngine::new(SelfPlayConfig {
            games_per_iteration: 8,
            max_concurrent_games: 4,
            max_steps_per_game: 150,
            alternate_colors: true,
            show_progress: false,
        })
        .unwrap();
        let report = engine
            .run_iteration(0, &main, &opponent, &env(), &seeds)
            .unwrap();
        // Every done transition carries a finite reward.
        for t in report.experiences.iter().filter(|t| t.done) {
            assert!(t.reward.is_finite());
        }
        // Step-limited games are reported for orchestrator attribution.
        let step_limited = report.outcomes.get("step_limit").copied().unwrap_or(0);
        assert_eq!(step_limited as usize, report.step_limit_games.len());
    }
}
