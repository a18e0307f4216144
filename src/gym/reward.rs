use serde::{Deserialize, Serialize};

use crate::chess::{Board, Color, GameStatus, PieceKind};
use crate::error::{CaissaResult, EnvError};

/// Maximum material one side can hold, used to normalize shaping features.
const MATERIAL_SCALE: f64 = 39.0;

/// Mobility normalization; well above any realistic legal-move count.
const MOBILITY_SCALE: f64 = 128.0;

/// Terminal and shaping reward parameters, always expressed from the mover's
/// perspective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub win_reward: f64,
    pub loss_reward: f64,
    pub draw_reward: f64,

    /// Flat reward added to every non-terminal step.
    pub step_penalty: f64,

    /// Reward returned for an action that decodes outside the legal set. The
    /// position is left untouched.
    pub invalid_action_penalty: f64,

    /// Enables the bounded positional shaping term on non-terminal steps.
    pub enable_position_rewards: bool,
    pub material_weight: f64,
    pub mobility_weight: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            win_reward: 1.0,
            loss_reward: -1.0,
            draw_reward: 0.0,
            step_penalty: 0.0,
            invalid_action_penalty: 0.0,
            enable_position_rewards: false,
            material_weight: 0.01,
            mobility_weight: 0.005,
        }
    }
}

impl RewardConfig {
    pub fn validate(&self) -> CaissaResult<()> {
        for (name, value) in [
            ("win_reward", self.win_reward),
            ("loss_reward", self.loss_reward),
            ("draw_reward", self.draw_reward),
            ("step_penalty", self.step_penalty),
            ("invalid_action_penalty", self.invalid_action_penalty),
            ("material_weight", self.material_weight),
            ("mobility_weight", self.mobility_weight),
        ] {
            if !value.is_finite() {
                return Err(EnvError::InvalidConfig(format!("{name} must be finite")).into());
            }
        }
        Ok(())
    }

    /// Reward for the player who just moved, given the resulting status.
    pub fn terminal_reward(&self, status: GameStatus, mover: Color) -> f64 {
        match status {
            GameStatus::Checkmate(winner) if winner == mover => self.win_reward,
            GameStatus::Checkmate(_) => self.loss_reward,
            GameStatus::InProgress => 0.0,
            _ => self.draw_reward,
        }
    }

    /// Bounded positional shaping from `mover`'s perspective:
    /// `|shape| <= material_weight + mobility_weight` by construction.
    pub fn shaping(&self, board: &Board, mover: Color) -> f64 {
        if !self.enable_position_rewards {
            return 0.0;
        }
        let material_diff =
            (board.material(mover) - board.material(mover.opposite())) / MATERIAL_SCALE;
        let mobility_diff = (board.legal_moves(mover).len() as f64
            - board.legal_moves(mover.opposite()).len() as f64)
            / MOBILITY_SCALE;
        self.material_weight * material_diff.clamp(-1.0, 1.0)
            + self.mobility_weight * mobility_diff.clamp(-1.0, 1.0)
    }
}

// ============================================================================
// Early adjudication
// ============================================================================

/// Optional early termination of hopeless or endless games.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationConfig {
    pub enabled: bool,

    /// Material lead that counts as decisive.
    pub material_margin: f64,

    /// Consecutive plies the margin must persist before adjudication.
    pub margin_plies: u32,

    /// Halfmoves without capture or pawn move before a trivial forced win
    /// (K+Q, K+R, K+B+B, K+B+N vs bare king) is adjudicated.
    pub trivial_win_no_progress_plies: u32,

    /// Halfmoves without progress before the game is adjudicated drawn.
    pub max_no_progress_plies: u32,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            material_margin: 15.0,
            margin_plies: 10,
            trivial_win_no_progress_plies: 30,
            max_no_progress_plies: 80,
        }
    }
}

/// Why a game was adjudicated, and for whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adjudication {
    MaterialWin(Color),
    TrivialForcedWin(Color),
    NoProgressDraw,
}

impl Adjudication {
    pub fn winner(&self) -> Option<Color> {
        match self {
            Adjudication::MaterialWin(color) | Adjudication::TrivialForcedWin(color) => Some(*color),
            Adjudication::NoProgressDraw => None,
        }
    }
}

impl AdjudicationConfig {
    /// Checks the position after a move; `margin_streak` counts consecutive
    /// plies the material margin has held, maintained by the caller.
    pub fn adjudicate(&self, board: &Board, margin_streak: u32) -> Option<Adjudication> {
        if !self.enabled {
            return None;
        }
        if board.halfmove_clock() >= self.max_no_progress_plies {
            return Some(Adjudication::NoProgressDraw);
        }
        if let Some(winner) = trivial_winner(board) {
            if board.halfmove_clock() >= self.trivial_win_no_progress_plies {
                return Some(Adjudication::TrivialForcedWin(winner));
            }
        }
        if margin_streak >= self.margin_plies {
            let diff = board.material(Color::White) - board.material(Color::Black);
            if diff.abs() >= self.material_margin {
                let winner = if diff > 0.0 { Color::White } else { Color::Black };
                return Some(Adjudication::MaterialWin(winner));
            }
        }
        None
    }

    /// Whether the current position keeps a decisive material margin alive.
    pub fn margin_holds(&self, board: &Board) -> bool {
        (board.material(Color::White) - board.material(Color::Black)).abs()
            >= self.material_margin
    }
}

/// Detects K+Q, K+R, K+B+B (opposite colors handled by sufficiency), and
/// K+B+N against a bare king.
fn trivial_winner(board: &Board) -> Option<Color> {
    let mut white = Vec::new();
    let mut black = Vec::new();
    for (_, piece) in board.pieces() {
        if piece.kind != PieceKind::King {
            match piece.color {
                Color::White => white.push(piece.kind),
                Color::Black => black.push(piece.kind),
            }
        }
    }
    match (white.is_empty(), black.is_empty()) {
        (false, true) => is_trivial_set(&white).then_some(Color::White),
        (true, false) => is_trivial_set(&black).then_some(Color::Black),
        _ => None,
    }
}

fn is_trivial_set(pieces: &[PieceKind]) -> bool {
    use PieceKind::*;
    let mut sorted: Vec<PieceKind> = pieces.to_vec();
    sorted.sort_by_key(|k| *k as u8);
    matches!(
        sorted.as_slice(),
        [Queen] | [Rook] | [Bishop, Bishop] | [Knight, Bishop] | [Bishop, Knight]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(fen: &str) -> Board {
        Board::from_fen(fen).unwrap()
    }

    #[test]
    fn terminal_rewards_follow_perspective() {
        let config = RewardConfig::default();
        assert_eq!(
            config.terminal_reward(GameStatus::Checkmate(Color::White), Color::White),
            1.0
        );
        assert_eq!(
            config.terminal_reward(GameStatus::Checkmate(Color::White), Color::Black),
            -1.0
        );
        assert_eq!(config.terminal_reward(GameStatus::Stalemate, Color::White), 0.0);
        assert_eq!(config.terminal_reward(GameStatus::InProgress, Color::White), 0.0);
    }

    #[test]
    fn shaping_disabled_by_default() {
        let config = RewardConfig::default();
        let b = board("4k3/8/8/8/8/8/8/Q3K3 w - - 0 1");
        assert_eq!(config.shaping(&b, Color::White), 0.0);
    }

    #[test]
    fn shaping_is_bounded_and_signed() {
        let config = RewardConfig {
            enable_position_rewards: true,
            ..RewardConfig::default()
        };
        let b = board("4k3/8/8/8/8/8/8/Q3K3 w - - 0 1");
        let for_white = config.shaping(&b, Color::White);
        let for_black = config.shaping(&b, Color::Black);
        assert!(for_white > 0.0);
        assert!(for_black < 0.0);
        let bound = config.material_weight + config.mobility_weight;
        assert!(for_white.abs() <= bound + 1e-12);
    }

    #[test]
    fn non_finite_rewards_rejected() {
        let config = RewardConfig {
            win_reward: f64::NAN,
            ..RewardConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_adjudication_is_silent() {
        let config = AdjudicationConfig::default();
        let b = board("4k3/8/8/8/8/8/8/Q3K3 w - - 90 80");
        assert_eq!(config.adjudicate(&b, 100), None);
    }

    #[test]
    fn no_progress_draw() {
        let config = AdjudicationConfig {
            enabled: true,
            ..AdjudicationConfig::default()
        };
        let b = board("4k3/8/8/3n4/8/2N5/8/4K3 w - - 80 90");
        assert_eq!(config.adjudicate(&b, 0), Some(Adjudication::NoProgressDraw));
    }

    #[test]
    fn trivial_forced_win_needs_stalled_clock() {
        let config = AdjudicationConfig {
            enabled: true,
            ..AdjudicationConfig::default()
        };
        let fresh = board("4k3/8/8/8/8/8/8/Q3K3 w - - 0 1");
        assert_eq!(config.adjudicate(&fresh, 0), None);
        let stalled = board("4k3/8/8/8/8/8/8/Q3K3 w - - 35 60");
        assert_eq!(
            config.adjudicate(&stalled, 0),
            Some(Adjudication::TrivialForcedWin(Color::White))
        );
    }

    #[test]
    fn trivial_sets() {
        use PieceKind::*;
        assert!(is_trivial_set(&[Queen]));
        assert!(is_trivial_set(&[Rook]));
        assert!(is_trivial_set(&[Bishop, Bishop]));
        assert!(is_trivial_set(&[Bishop, Knight]));
        assert!(!is_trivial_set(&[Bishop]));
        assert!(!is_trivial_set(&[Knight, Knight]));
        assert!(!is_trivial_set(&[Queen, Rook]));
    }

    #[test]
    fn material_margin_requires_streak() {
        let config = AdjudicationConfig {
            enabled: true,
            ..AdjudicationConfig::default()
        };
        // Queen + rook vs lone knight: diff = 14 - 3 = 11 < 15, no win.
        let close = board("4k3/8/8/3n4/8/8/8/QR2K3 w - - 0 1");
        assert_eq!(config.adjudicate(&close, 50), None);
        // Two queens up: diff = 18 > 15, adjudicated once the streak is long enough.
        let decisive = board("4k3/8/8/3n4/8/8/8/QQ2K3 w - - 0 1");
        assert_eq!(config.adjudicate(&decisive, 5), None);
        assert_eq!(
            config.adjudicate(&decisive, 10),
            Some(Adjudication::MaterialWin(Color::White))
        );
    }
}
