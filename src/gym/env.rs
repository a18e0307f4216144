use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chess::{Board, Color, GameStatus, PieceKind, Square};
use crate::error::{CaissaResult, EnvError};
use crate::gym::reward::Adjudication;
use crate::gym::{ActionSpace, AdjudicationConfig, EnvStatus, Reward, RewardConfig, StepOutcome};

/// Number of piece-plane features: 12 planes of 64 squares.
const PLANE_FEATURES: usize = 12 * 64;

/// Piece planes plus side-to-move, castling (4), en-passant file, and the two
/// normalized move counters.
pub const STATE_FEATURES: usize = PLANE_FEATURES + 8;

/// Game environment contract consumed by the self-play engine and the
/// training loop. Implementations never block inside `step`.
pub trait Env {
    /// Starts a fresh game and returns the initial observation.
    fn reset(&mut self) -> Vec<f64>;

    /// Applies one action. Illegal actions leave the position untouched and
    /// return the configured penalty.
    fn step(&mut self, action: usize) -> CaissaResult<StepResult>;

    /// Action indices that decode to a legal move in the current position.
    fn valid_actions(&self) -> Vec<usize>;

    fn is_terminal(&self) -> bool;

    fn state_size(&self) -> usize;

    fn action_size(&self) -> usize;

    /// Dense 0/1 vector over the whole action space.
    fn action_mask(&self) -> Vec<f64>;

    fn game_status(&self) -> GameStatus;

    /// Replaces the current game with a position parsed from FEN. Returns
    /// `false` (leaving the environment untouched) when parsing fails.
    fn load_from_fen(&mut self, fen: &str) -> bool;
}

/// Outcome of one environment step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub next_state: Vec<f64>,
    pub reward: Reward,
    pub outcome: StepOutcome,
    pub info: StepInfo,
}

impl StepResult {
    pub fn done(&self) -> bool {
        self.outcome.is_terminal()
    }
}

/// Side information reported alongside every step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    pub status: GameStatus,
    /// The side that took (or attempted) the action.
    pub mover: Color,
    pub illegal_action: bool,
    pub adjudication: Option<Adjudication>,
    pub ply: u32,
}

/// Chess environment over the rules collaborator.
///
/// Rewards are always from the mover's perspective. The step-limit penalty is
/// deliberately absent here: the orchestrator owns it, so the environment
/// only ever reports legitimate game endings.
#[derive(Debug, Clone)]
pub struct ChessEnv {
    board: Board,
    reward_cfg: RewardConfig,
    adjudication_cfg: AdjudicationConfig,
    status: EnvStatus,
    game_status: GameStatus,
    position_history: Vec<u64>,
    margin_streak: u32,
    ply: u32,
}

impl ChessEnv {
    pub fn new(reward_cfg: RewardConfig, adjudication_cfg: AdjudicationConfig) -> CaissaResult<Self> {
        reward_cfg.validate()?;
        let board = Board::new();
        let key = board.position_key();
        Ok(Self {
            board,
            reward_cfg,
            adjudication_cfg,
            status: EnvStatus::Ready,
            game_status: GameStatus::InProgress,
            position_history: vec![key],
            margin_streak: 0,
            ply: 0,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn status(&self) -> EnvStatus {
        self.status
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    pub fn ply(&self) -> u32 {
        self.ply
    }

    pub fn reward_config(&self) -> &RewardConfig {
        &self.reward_cfg
    }

    fn begin(&mut self, board: Board) {
        self.position_history = vec![board.position_key()];
        self.board = board;
        self.status = EnvStatus::Running;
        self.margin_streak = 0;
        self.ply = 0;
        // A loaded position may already be decided.
        self.game_status = self.board.game_status(&self.position_history);
        if self.game_status.is_terminal() {
            self.status = EnvStatus::GameOver;
        }
    }

    /// Current observation, independent of whose turn it is: features are
    /// absolute (white perspective), with the side-to-move flag carrying turn
    /// information.
    pub fn observe(&self) -> Vec<f64> {
        encode_state(&self.board)
    }

    fn finish(&mut self, status: GameStatus) {
        self.game_status = status;
        self.status = EnvStatus::GameOver;
    }
}

impl Env for ChessEnv {
    fn reset(&mut self) -> Vec<f64> {
        self.begin(Board::new());
        self.observe()
    }

    #[tracing::instrument(skip(self), fields(ply = self.ply))]
    fn step(&mut self, action: usize) -> CaissaResult<StepResult> {
        if self.status.is_game_over() {
            return Err(EnvError::SteppedTerminal.into());
        }
        if action >= ActionSpace::SIZE {
            return Err(EnvError::ActionOutOfRange {
                action,
                size: ActionSpace::SIZE,
            }
            .into());
        }
        self.status = EnvStatus::Running;
        let mover = self.board.side_to_move();
        let legal = self.board.legal_moves(mover);

        // 1. Decode A(t) against the legal set; reject without mutation.
        let Some(mv) = ActionSpace::decode_legal(action, &legal) else {
            debug!(action, "illegal action rejected");
            return Ok(StepResult {
                next_state: self.observe(),
                reward: Reward(self.reward_cfg.invalid_action_penalty),
                outcome: StepOutcome::InProgress,
                info: StepInfo {
                    status: self.game_status,
                    mover,
                    illegal_action: true,
                    adjudication: None,
                    ply: self.ply,
                },
            });
        };

        // 2. Apply S(t) -> S(t+1).
        self.board.apply_unchecked(mv);
        self.ply += 1;
        self.position_history.push(self.board.position_key());

        // 3. Classify the resulting position.
        let status = self.board.game_status(&self.position_history);
        self.margin_streak = if self.adjudication_cfg.margin_holds(&self.board) {
            self.margin_streak + 1
        } else {
            0
        };
        let adjudication = if status.is_terminal() {
            None
        } else {
            self.adjudication_cfg.adjudicate(&self.board, self.margin_streak)
        };

        // 4. Reward from the mover's perspective.
        let (reward, outcome) = match (status, adjudication) {
            (status, _) if status.is_terminal() => {
                self.finish(status);
                (self.reward_cfg.terminal_reward(status, mover), StepOutcome::Terminated)
            }
            (_, Some(adjudication)) => {
                let status = adjudication_status(adjudication);
                self.finish(status);
                (self.reward_cfg.terminal_reward(status, mover), StepOutcome::Terminated)
            }
            _ => {
                let shaped = self.reward_cfg.shaping(&self.board, mover);
                (self.reward_cfg.step_penalty + shaped, StepOutcome::InProgress)
            }
        };

        Ok(StepResult {
            next_state: self.observe(),
            reward: Reward(reward),
            outcome,
            info: StepInfo {
                status: self.game_status,
                mover,
                illegal_action: false,
                adjudication,
                ply: self.ply,
            },
        })
    }

    fn valid_actions(&self) -> Vec<usize> {
        ActionSpace::indices(&self.board.legal_moves(self.board.side_to_move()))
    }

    fn is_terminal(&self) -> bool {
        self.status.is_game_over()
    }

    fn state_size(&self) -> usize {
        STATE_FEATURES
    }

    fn action_size(&self) -> usize {
        ActionSpace::SIZE
    }

    fn action_mask(&self) -> Vec<f64> {
        ActionSpace::mask(&self.board.legal_moves(self.board.side_to_move()))
    }

    fn game_status(&self) -> GameStatus {
        self.game_status
    }

    fn load_from_fen(&mut self, fen: &str) -> bool {
        match Board::from_fen(fen) {
            Ok(board) => {
                self.begin(board);
                true
            }
            Err(_) => false,
        }
    }
}

/// Maps an adjudication verdict onto the closest rules-level status, so that
/// downstream reporting does not need a parallel taxonomy.
fn adjudication_status(adjudication: Adjudication) -> GameStatus {
    match adjudication.winner() {
        Some(winner) => GameStatus::Checkmate(winner),
        None => GameStatus::DrawFiftyMove,
    }
}

/// Encodes a position as 12 piece planes plus scalar features.
pub fn encode_state(board: &Board) -> Vec<f64> {
    let mut state = vec![0.0; STATE_FEATURES];
    for (sq, piece) in board.pieces() {
        let color_offset = if piece.color.is_white() { 0 } else { 6 };
        let plane = color_offset + plane_index(piece.kind);
        state[plane * 64 + sq.index()] = 1.0;
    }
    let mut scalar = PLANE_FEATURES;
    state[scalar] = if board.side_to_move().is_white() { 1.0 } else { 0.0 };
    scalar += 1;
    for bit in 0..4 {
        state[scalar + bit] = if board.castling().0 & (1 << bit) != 0 {
            1.0
        } else {
            0.0
        };
    }
    scalar += 4;
    state[scalar] = board
        .en_passant()
        .map(|sq: Square| (sq.file() as f64 + 1.0) / 8.0)
        .unwrap_or(0.0);
    scalar += 1;
    state[scalar] = (board.halfmove_clock() as f64 / 100.0).min(1.0);
    scalar += 1;
    state[scalar] = (board.fullmove_number() as f64 / 200.0).min(1.0);
    state
}

fn plane_index(kind: PieceKind) -> usize {
    match kind {
        PieceKind::Pawn => 0,
        PieceKind::Knight => 1,
        PieceKind::Bishop => 2,
        PieceKind::Rook => 3,
        PieceKind::Queen => 4,
        PieceKind::King => 5,
    }
}
