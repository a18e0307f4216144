use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::{CaissaResult, ChessError};

pub mod board;
pub mod movegen;
pub mod status;

pub use board::Board;
pub use status::GameStatus;

/// Side to move / piece ownership.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(&self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn is_white(&self) -> bool {
        matches!(self, Color::White)
    }

    /// Pawn push direction on the rank-major square grid.
    pub(crate) fn forward(&self) -> i32 {
        match self {
            Color::White => 8,
            Color::Black => -8,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// Conventional material value in centipawn-free units, used by the
    /// positional reward shaping and early adjudication.
    pub fn material_value(&self) -> f64 {
        match self {
            PieceKind::Pawn => 1.0,
            PieceKind::Knight | PieceKind::Bishop => 3.0,
            PieceKind::Rook => 5.0,
            PieceKind::Queen => 9.0,
            PieceKind::King => 0.0,
        }
    }

    fn fen_char(&self) -> char {
        match self {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        }
    }

    pub(crate) fn from_fen_char(c: char) -> Option<PieceKind> {
        match c.to_ascii_lowercase() {
            'p' => Some(PieceKind::Pawn),
            'n' => Some(PieceKind::Knight),
            'b' => Some(PieceKind::Bishop),
            'r' => Some(PieceKind::Rook),
            'q' => Some(PieceKind::Queen),
            'k' => Some(PieceKind::King),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    pub fn new(kind: PieceKind, color: Color) -> Self {
        Self { kind, color }
    }

    pub fn fen_char(&self) -> char {
        let c = self.kind.fen_char();
        match self.color {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }
}

/// A board square, indexed rank-major from White's side: `a1 = 0`, `h1 = 7`,
/// `a8 = 56`, `h8 = 63`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Square(pub u8);

impl Square {
    pub const COUNT: usize = 64;

    pub fn new(index: usize) -> CaissaResult<Square> {
        if index < Self::COUNT {
            Ok(Square(index as u8))
        } else {
            Err(ChessError::InvalidSquare(index).into())
        }
    }

    pub fn from_file_rank(file: u8, rank: u8) -> Square {
        Square(rank * 8 + file)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// File 0..8 (a..h).
    pub fn file(&self) -> u8 {
        self.0 % 8
    }

    /// Rank 0..8 (1..8).
    pub fn rank(&self) -> u8 {
        self.0 / 8
    }

    pub fn algebraic(&self) -> String {
        let file = (b'a' + self.file()) as char;
        let rank = (b'1' + self.rank()) as char;
        format!("{file}{rank}")
    }

    pub fn from_algebraic(s: &str) -> Option<Square> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].checked_sub(b'a')?;
        let rank = bytes[1].checked_sub(b'1')?;
        if file < 8 && rank < 8 {
            Some(Square::from_file_rank(file, rank))
        } else {
            None
        }
    }

    /// Offset by a signed delta, returning `None` when the result leaves the board.
    pub(crate) fn offset(&self, delta: i32) -> Option<Square> {
        let target = self.0 as i32 + delta;
        if (0..64).contains(&target) {
            Some(Square(target as u8))
        } else {
            None
        }
    }
}

/// A chess move in coordinate form, with an optional promotion piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
}

impl Move {
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    pub fn promoting(from: Square, to: Square, promotion: PieceKind) -> Self {
        Self {
            from,
            to,
            promotion: Some(promotion),
        }
    }

    /// UCI-style long algebraic notation, e.g. `e2e4` or `e7e8q`.
    pub fn uci(&self) -> String {
        let mut s = format!("{}{}", self.from.algebraic(), self.to.algebraic());
        if let Some(kind) = self.promotion {
            s.push(kind.fen_char());
        }
        s
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uci())
    }
}

/// Castling availability, one bit per right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastlingRights(pub u8);

impl CastlingRights {
    pub const WHITE_KINGSIDE: u8 = 0b0001;
    pub const WHITE_QUEENSIDE: u8 = 0b0010;
    pub const BLACK_KINGSIDE: u8 = 0b0100;
    pub const BLACK_QUEENSIDE: u8 = 0b1000;

    pub fn all() -> Self {
        Self(0b1111)
    }

    pub fn none() -> Self {
        Self(0)
    }

    pub fn has(&self, right: u8) -> bool {
        self.0 & right != 0
    }

    pub fn clear(&mut self, right: u8) {
        self.0 &= !right;
    }

    pub fn fen_fragment(&self) -> String {
        if self.0 == 0 {
            return "-".to_string();
        }
        let mut s = String::new();
        if self.has(Self::WHITE_KINGSIDE) {
            s.push('K');
        }
        if self.has(Self::WHITE_QUEENSIDE) {
            s.push('Q');
        }
        if self.has(Self::BLACK_KINGSIDE) {
            s.push('k');
        }
        if self.has(Self::BLACK_QUEENSIDE) {
            s.push('q');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_flips_color() {
        assert_eq!(Color::White.opposite(), Color::Black);
        assert_eq!(Color::Black.opposite(), Color::White);
    }

    #[test]
    fn square_round_trips_algebraic() {
        for index in 0..Square::COUNT {
            let sq = Square::new(index).unwrap();
            assert_eq!(Square::from_algebraic(&sq.algebraic()), Some(sq));
        }
    }

    #[test]
    fn square_corners() {
        assert_eq!(Square::from_algebraic("a1"), Some(Square(0)));
        assert_eq!(Square::from_algebraic("h1"), Some(Square(7)));
        assert_eq!(Square::from_algebraic("a8"), Some(Square(56)));
        assert_eq!(Square::from_algebraic("h8"), Some(Square(63)));
        assert_eq!(Square::from_algebraic("i1"), None);
        assert_eq!(Square::from_algebraic("a9"), None);
    }

    #[test]
    fn move_uci_notation() {
        let m = Move::new(Square::from_algebraic("e2").unwrap(), Square::from_algebraic("e4").unwrap());
        assert_eq!(m.uci(), "e2e4");
        let p = Move::promoting(
            Square::from_algebraic("e7").unwrap(),
            Square::from_algebraic("e8").unwrap(),
            PieceKind::Queen,
        );
        assert_eq!(p.uci(), "e7e8q");
    }

    #[test]
    fn castling_rights_fen() {
        assert_eq!(CastlingRights::all().fen_fragment(), "KQkq");
        assert_eq!(CastlingRights::none().fen_fragment(), "-");
        let mut rights = CastlingRights::all();
        rights.clear(CastlingRights::WHITE_QUEENSIDE);
        rights.clear(CastlingRights::BLACK_KINGSIDE);
        assert_eq!(rights.fen_fragment(), "Kq");
    }

    #[test]
    fn out_of_range_square_errors() {
        assert!(Square::new(64).is_err());
        assert!(Square::new(63).is_ok());
    }
}
