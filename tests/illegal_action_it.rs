//! Illegal-action safety at the environment boundary: no mutation on
//! out-of-mask actions, and promotion-pair remapping to the queen promotion.

use caissa::chess::{PieceKind, Square};
use caissa::gym::{AdjudicationConfig, ChessEnv, Env, RewardConfig};

fn env() -> ChessEnv {
    ChessEnv::new(RewardConfig::default(), AdjudicationConfig::default()).unwrap()
}

fn action(from: &str, to: &str) -> usize {
    Square::from_algebraic(from).unwrap().index() * 64 + Square::from_algebraic(to).unwrap().index()
}

#[test]
fn step_never_mutates_on_illegal_action() {
    let mut env = env();
    env.reset();
    let before = env.board().to_fen();
    let mask = env.action_mask();

    // Probe a handful of actions that are outside the legal mask.
    for candidate in [action("e2", "e5"), action("a1", "h8"), action("d1", "d4")] {
        assert_eq!(mask[candidate], 0.0, "probe must be illegal");
        let result = env.step(candidate).unwrap();
        assert!(result.info.illegal_action);
        assert!(!result.done());
        assert_eq!(env.board().to_fen(), before, "state changed on illegal action");
    }
}

#[test]
fn promotion_pair_executes_queen_variant() {
    let mut env = env();
    assert!(env.load_from_fen("4k3/P7/8/8/8/8/8/4K3 w - - 0 1"));

    // The bare from→to pair does not name a promotion piece; the environment
    // must pick the queen.
    let result = env.step(action("a7", "a8")).unwrap();
    assert!(!result.info.illegal_action);
    assert!(!result.done());
    assert!(result.reward.is_finite());
    assert_eq!(
        env.board()
            .piece_at(Square::from_algebraic("a8").unwrap())
            .map(|p| p.kind),
        Some(PieceKind::Queen)
    );
}

#[test]
fn valid_actions_and_mask_agree_everywhere() {
    let mut env = env();
    env.reset();
    // Play a few plies with the first valid action and re-check agreement.
    for _ in 0..6 {
        let actions = env.valid_actions();
        let mask = env.action_mask();
        assert_eq!(
            mask.iter().filter(|&&m| m == 1.0).count(),
            actions.len()
        );
        for a in &actions {
            assert_eq!(mask[*a], 1.0);
        }
        let result = env.step(actions[0]).unwrap();
        if result.done() {
            break;
        }
    }
}
