use serde::{Deserialize, Serialize};
use strum::Display;

use crate::chess::{Board, Color, PieceKind, Square};

/// Terminal classification of a chess position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum GameStatus {
    InProgress,

    /// The given color delivered mate (i.e. the side to move is mated).
    Checkmate(Color),

    Stalemate,

    DrawFiftyMove,

    DrawRepetition,

    DrawInsufficientMaterial,
}

impl GameStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GameStatus::InProgress)
    }

    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            GameStatus::Stalemate
                | GameStatus::DrawFiftyMove
                | GameStatus::DrawRepetition
                | GameStatus::DrawInsufficientMaterial
        )
    }

    pub fn winner(&self) -> Option<Color> {
        match self {
            GameStatus::Checkmate(winner) => Some(*winner),
            _ => None,
        }
    }
}

impl Board {
    /// Classifies the current position. `history` is the sequence of
    /// [`Board::position_key`] values observed so far in the game, including
    /// the current position; repetition needs it, everything else is derived
    /// from the board alone.
    pub fn game_status(&self, history: &[u64]) -> GameStatus {
        let to_move = self.side_to_move();
        if self.legal_moves(to_move).is_empty() {
            return if self.is_in_check(to_move) {
                GameStatus::Checkmate(to_move.opposite())
            } else {
                GameStatus::Stalemate
            };
        }
        if self.halfmove_clock() >= 100 {
            return GameStatus::DrawFiftyMove;
        }
        let key = self.position_key();
        if history.iter().filter(|&&k| k == key).count() >= 3 {
            return GameStatus::DrawRepetition;
        }
        if self.is_insufficient_material() {
            return GameStatus::DrawInsufficientMaterial;
        }
        GameStatus::InProgress
    }

    /// Dead positions per FIDE article 5.2.2: K vs K, K+B vs K, K+N vs K,
    /// and K+B vs K+B with both bishops on the same square color.
    pub fn is_insufficient_material(&self) -> bool {
        let mut minors: Vec<(Square, PieceKind)> = Vec::new();
        for (sq, piece) in self.pieces() {
            match piece.kind {
                PieceKind::King => {}
                PieceKind::Bishop | PieceKind::Knight => minors.push((sq, piece.kind)),
                _ => return false,
            }
        }
        match minors.as_slice() {
            [] | [_] => true,
            [(a, PieceKind::Bishop), (b, PieceKind::Bishop)] => {
                square_color(*a) == square_color(*b)
            }
            _ => false,
        }
    }
}

fn square_color(sq: Square) -> bool {
    (sq.file() + sq.rank()) % 2 == 0
}
