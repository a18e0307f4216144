use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::AgentSnapshot;
use crate::chess::Color;
use crate::error::CaissaResult;
use crate::gym::{ChessEnv, Env};
use crate::seed::SeedManager;

/// Outcome rates of one evaluation phase, from the main agent's perspective.
/// `average_reward` over evaluation games is the scalar fed to the
/// convergence detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub games: usize,
    pub wins: usize,
    pub draws: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub draw_rate: f64,
    pub loss_rate: f64,
    pub average_reward: f64,
    pub average_game_length: f64,
}

/// Plays `games` evaluation games between two frozen snapshots.
///
/// Evaluation runs sequentially on the orchestrator thread; its randomness
/// comes from the general stream keyed by iteration and game index, so it
/// never perturbs self-play determinism.
pub fn evaluate_snapshots(
    main: &AgentSnapshot,
    opponent: &AgentSnapshot,
    env_prototype: &ChessEnv,
    games: usize,
    iteration: u64,
    max_steps: usize,
    seeds: &SeedManager,
) -> CaissaResult<EvaluationReport> {
    let mut wins = 0;
    let mut draws = 0;
    let mut losses = 0;
    let mut total_reward = 0.0;
    let mut total_plies = 0u64;

    for game_index in 0..games {
        let seed = seeds.subseed("general", iteration, game_index as u64)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut env = env_prototype.clone();
        let main_color = if game_index % 2 == 0 {
            Color::White
        } else {
            Color::Black
        };

        let mut state = env.reset();
        let mut main_reward = 0.0;
        let mut finished = false;
        for _ in 0..max_steps {
            let mover = env.side_to_move();
            let valid = env.valid_actions();
            if valid.is_empty() {
                break;
            }
            let snapshot = if mover == main_color { main } else { opponent };
            let action = snapshot.select_action(&state, &valid, &mut rng)?;
            let result = env.step(action)?;
            total_plies += 1;
            if mover == main_color {
                main_reward += result.reward.0;
            }
            let done = result.done();
            state = result.next_state;
            if done {
                finished = true;
                break;
            }
        }

        if finished {
            match env.game_status().winner() {
                Some(winner) if winner == main_color => wins += 1,
                Some(_) => {
                    losses += 1;
                    // The terminal reward landed on the opponent's ply.
                    main_reward += env.reward_config().loss_reward;
                }
                None => {
                    draws += 1;
                    if env.board().side_to_move() == main_color {
                        main_reward += env.reward_config().draw_reward;
                    }
                }
            }
        } else {
            draws += 1;
        }
        total_reward += main_reward;
        debug!(game_index, main_reward, finished, "evaluation game done");
    }

    let denom = games.max(1) as f64;
    Ok(EvaluationReport {
        games,
        wins,
        draws,
        losses,
        win_rate: wins as f64 / denom,
        draw_rate: draws as f64 / denom,
        loss_rate: losses as f64 / denom,
        average_reward: total_reward / denom,
        average_game_length: total_plies as f64 / denom,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentKind, make_agent};
    use crate::gym::env::STATE_FEATURES;
    use crate::gym::{ActionSpace, AdjudicationConfig, RewardConfig};
    use crate::nn::NetworkConfig;

    fn snapshot(seeds: &SeedManager) -> AgentSnapshot {
        make_agent(
            AgentKind::Dqn,
            NetworkConfig {
                input_size: STATE_FEATURES,
                hidden_layers: vec![12],
                output_size: ActionSpace::SIZE,
                ..NetworkConfig::default()
            },
            8,
            1.0,
            seeds,
        )
        .unwrap()
        .snapshot()
    }

    #[test]
    fn rates_sum_to_one() {
        let seeds = SeedManager::new();
        seeds.set_master(8).unwrap();
        let main = snapshot(&seeds);
        let opponent = main.clone();
        let env = ChessEnv::new(RewardConfig::default(), AdjudicationConfig::default()).unwrap();
        let report = evaluate_snapshots(&main, &opponent, &env, 4, 0, 60, &seeds).unwrap();
        assert_eq!(report.games, 4);
        assert_eq!(report.wins + report.draws + report.losses, 4);
        assert!((report.win_rate + report.draw_rate + report.loss_rate - 1.0).abs() < 1e-12);
        assert!(report.average_reward.is_finite());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let run = || {
            let seeds = SeedManager::new();
            seeds.set_master(21).unwrap();
            let main = snapshot(&seeds);
            let opponent = main.clone();
            let env =
                ChessEnv::new(RewardConfig::default(), AdjudicationConfig::default()).unwrap();
            evaluate_snapshots(&main, &opponent, &env, 3, 5, 60, &seeds).unwrap()
        };
        assert_eq!(run(), run());
    }
}
