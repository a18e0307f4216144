use std::hash::{Hash, Hasher};

use crate::chess::{CastlingRights, Color, Move, Piece, PieceKind, Square};
use crate::error::{CaissaResult, ChessError};

/// Mailbox chess board with full rules state.
///
/// Squares are rank-major from White's side (`a1 = 0`). The board is cheap to
/// clone; legality checks work on a copy rather than via undo bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    squares: [Option<Piece>; 64],
    side_to_move: Color,
    castling: CastlingRights,
    en_passant: Option<Square>,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// Standard starting position.
    pub fn new() -> Self {
        let mut board = Self {
            squares: [None; 64],
            side_to_move: Color::White,
            castling: CastlingRights::all(),
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        };
        board.place_back_rank(0, Color::White);
        board.place_back_rank(7, Color::Black);
        for file in 0..8 {
            board.squares[Square::from_file_rank(file, 1).index()] =
                Some(Piece::new(PieceKind::Pawn, Color::White));
            board.squares[Square::from_file_rank(file, 6).index()] =
                Some(Piece::new(PieceKind::Pawn, Color::Black));
        }
        board
    }

    fn place_back_rank(&mut self, rank: u8, color: Color) {
        use PieceKind::*;
        let order = [Rook, Knight, Bishop, Queen, King, Bishop, Knight, Rook];
        for (file, kind) in order.into_iter().enumerate() {
            self.squares[Square::from_file_rank(file as u8, rank).index()] =
                Some(Piece::new(kind, color));
        }
    }

    /// Restore the starting position.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index()]
    }

    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    pub fn castling(&self) -> CastlingRights {
        self.castling
    }

    pub fn en_passant(&self) -> Option<Square> {
        self.en_passant
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    pub fn king_square(&self, color: Color) -> Option<Square> {
        (0..64).map(|i| Square(i as u8)).find(|sq| {
            self.squares[sq.index()]
                .is_some_and(|p| p.kind == PieceKind::King && p.color == color)
        })
    }

    /// Iterator over all occupied squares with their pieces.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        self.squares
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|piece| (Square(i as u8), piece)))
    }

    /// Total material value for one side, kings excluded.
    pub fn material(&self, color: Color) -> f64 {
        self.pieces()
            .filter(|(_, p)| p.color == color)
            .map(|(_, p)| p.kind.material_value())
            .sum()
    }

    /// Applies a move after verifying it against the legal move list.
    pub fn make_move(&mut self, mv: Move) -> CaissaResult<()> {
        let legal = self.legal_moves(self.side_to_move);
        if !legal.contains(&mv) {
            return Err(ChessError::IllegalMove(mv.uci()).into());
        }
        self.apply_unchecked(mv);
        Ok(())
    }

    /// Applies a move that is already known to be legal.
    ///
    /// Callers must only pass moves obtained from [`Board::legal_moves`] for
    /// the current position; anything else corrupts the rules state.
    pub(crate) fn apply_unchecked(&mut self, mv: Move) {
        let mover = self.squares[mv.from.index()].take().unwrap_or_else(|| {
            unreachable!("apply_unchecked called with empty origin {}", mv.from.algebraic())
        });
        let is_capture = self.squares[mv.to.index()].is_some();
        let is_pawn = mover.kind == PieceKind::Pawn;

        // En passant capture removes the pawn behind the target square.
        if is_pawn && Some(mv.to) == self.en_passant {
            let victim = mv
                .to
                .offset(-mover.color.forward())
                .expect("en passant victim square on board");
            self.squares[victim.index()] = None;
        }

        // Castling also moves the rook.
        if mover.kind == PieceKind::King && mv.from.file() == 4 {
            match mv.to.file() {
                6 => self.move_rook_for_castle(mv.from.rank(), 7, 5),
                2 => self.move_rook_for_castle(mv.from.rank(), 0, 3),
                _ => {}
            }
        }

        let placed = match mv.promotion {
            Some(kind) => Piece::new(kind, mover.color),
            None => mover,
        };
        self.squares[mv.to.index()] = Some(placed);

        self.update_castling_rights(mv, mover);

        self.en_passant = if is_pawn && mv.to.index().abs_diff(mv.from.index()) == 16 {
            mv.from.offset(mover.color.forward())
        } else {
            None
        };

        if is_pawn || is_capture {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock += 1;
        }
        if self.side_to_move == Color::Black {
            self.fullmove_number += 1;
        }
        self.side_to_move = self.side_to_move.opposite();
    }

    fn move_rook_for_castle(&mut self, rank: u8, from_file: u8, to_file: u8) {
        let from = Square::from_file_rank(from_file, rank);
        let to = Square::from_file_rank(to_file, rank);
        if let Some(rook) = self.squares[from.index()].take() {
            self.squares[to.index()] = Some(rook);
        }
    }

    fn update_castling_rights(&mut self, mv: Move, mover: Piece) {
        use CastlingRights as CR;
        match (mover.kind, mover.color) {
            (PieceKind::King, Color::White) => {
                self.castling.clear(CR::WHITE_KINGSIDE | CR::WHITE_QUEENSIDE);
            }
            (PieceKind::King, Color::Black) => {
                self.castling.clear(CR::BLACK_KINGSIDE | CR::BLACK_QUEENSIDE);
            }
            _ => {}
        }
        for sq in [mv.from, mv.to] {
            match sq.index() {
                0 => self.castling.clear(CR::WHITE_QUEENSIDE),
                7 => self.castling.clear(CR::WHITE_KINGSIDE),
                56 => self.castling.clear(CR::BLACK_QUEENSIDE),
                63 => self.castling.clear(CR::BLACK_KINGSIDE),
                _ => {}
            }
        }
    }

    /// Position key for repetition detection. Covers piece placement, side to
    /// move, castling rights, and the en passant square, matching the FIDE
    /// notion of an identical position.
    pub fn position_key(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.squares.hash(&mut hasher);
        self.side_to_move.hash(&mut hasher);
        self.castling.hash(&mut hasher);
        self.en_passant.hash(&mut hasher);
        hasher.finish()
    }

    // ============================================================================
    // FEN
    // ============================================================================

    pub fn to_fen(&self) -> String {
        let mut placement = String::new();
        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                match self.squares[Square::from_file_rank(file, rank).index()] {
                    Some(piece) => {
                        if empty > 0 {
                            placement.push_str(&empty.to_string());
                            empty = 0;
                        }
                        placement.push(piece.fen_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                placement.push_str(&empty.to_string());
            }
            if rank > 0 {
                placement.push('/');
            }
        }
        let side = if self.side_to_move.is_white() { "w" } else { "b" };
        let ep = self
            .en_passant
            .map(|sq| sq.algebraic())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{placement} {side} {} {ep} {} {}",
            self.castling.fen_fragment(),
            self.halfmove_clock,
            self.fullmove_number
        )
    }

    pub fn from_fen(fen: &str) -> CaissaResult<Board> {
        let err = |msg: &str| ChessError::InvalidFen {
            fen: fen.to_string(),
            msg: msg.to_string(),
        };
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(err("expected at least 4 fields").into());
        }

        let mut squares = [None; 64];
        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(err("expected 8 ranks").into());
        }
        for (row, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - row as u8;
            let mut file = 0u8;
            for c in rank_str.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file += skip as u8;
                } else {
                    let kind = PieceKind::from_fen_char(c).ok_or_else(|| err("bad piece char"))?;
                    let color = if c.is_ascii_uppercase() {
                        Color::White
                    } else {
                        Color::Black
                    };
                    if file >= 8 {
                        return Err(err("rank overflow").into());
                    }
                    squares[Square::from_file_rank(file, rank).index()] =
                        Some(Piece::new(kind, color));
                    file += 1;
                }
            }
            if file != 8 {
                return Err(err("rank underflow").into());
            }
        }

        let side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            _ => return Err(err("bad side to move").into()),
        };

        let mut castling = CastlingRights::none();
        if fields[2] != "-" {
            for c in fields[2].chars() {
                match c {
                    'K' => castling.0 |= CastlingRights::WHITE_KINGSIDE,
                    'Q' => castling.0 |= CastlingRights::WHITE_QUEENSIDE,
                    'k' => castling.0 |= CastlingRights::BLACK_KINGSIDE,
                    'q' => castling.0 |= CastlingRights::BLACK_QUEENSIDE,
                    _ => return Err(err("bad castling field").into()),
                }
            }
        }

        let en_passant = match fields[3] {
            "-" => None,
            s => Some(Square::from_algebraic(s).ok_or_else(|| err("bad en passant square"))?),
        };

        let halfmove_clock = fields
            .get(4)
            .map(|s| s.parse().map_err(|_| err("bad halfmove clock")))
            .transpose()?
            .unwrap_or(0);
        let fullmove_number = fields
            .get(5)
            .map(|s| s.parse().map_err(|_| err("bad fullmove number")))
            .transpose()?
            .unwrap_or(1);

        let board = Board {
            squares,
            side_to_move,
            castling,
            en_passant,
            halfmove_clock,
            fullmove_number,
        };
        if board.king_square(Color::White).is_none() || board.king_square(Color::Black).is_none() {
            return Err(err("both kings are required").into());
        }
        Ok(board)
    }
}
