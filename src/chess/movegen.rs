use crate::chess::{Board, CastlingRights, Color, Move, Piece, PieceKind, Square};

const KNIGHT_DELTAS: [(i32, i32); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];

const KING_DELTAS: [(i32, i32); 8] = [
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
];

const BISHOP_RAYS: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, -1), (-1, 1)];
const ROOK_RAYS: [(i32, i32); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

/// Steps `sq` by a (file, rank) delta, returning `None` off the board edge.
fn shift(sq: Square, delta: (i32, i32)) -> Option<Square> {
    let file = sq.file() as i32 + delta.0;
    let rank = sq.rank() as i32 + delta.1;
    if (0..8).contains(&file) && (0..8).contains(&rank) {
        Some(Square::from_file_rank(file as u8, rank as u8))
    } else {
        None
    }
}

impl Board {
    /// All legal moves for `color`. Empty when `color` is checkmated or
    /// stalemated; callers distinguish the two via [`Board::is_in_check`].
    pub fn legal_moves(&self, color: Color) -> Vec<Move> {
        self.pseudo_legal_moves(color)
            .into_iter()
            .filter(|mv| {
                let mut probe = self.clone();
                probe.apply_unchecked(*mv);
                !probe.is_in_check(color)
            })
            .collect()
    }

    pub fn is_in_check(&self, color: Color) -> bool {
        match self.king_square(color) {
            Some(king) => self.is_attacked(king, color.opposite()),
            None => false,
        }
    }

    /// Whether `sq` is attacked by any piece of `by`.
    pub fn is_attacked(&self, sq: Square, by: Color) -> bool {
        // Pawn attacks converge on `sq` from the attacker's rear rank.
        let rear = -if by.is_white() { 1 } else { -1 };
        for df in [-1, 1] {
            if let Some(from) = shift(sq, (df, rear)) {
                if self.piece_at(from) == Some(Piece::new(PieceKind::Pawn, by)) {
                    return true;
                }
            }
        }
        for delta in KNIGHT_DELTAS {
            if let Some(from) = shift(sq, delta) {
                if self.piece_at(from) == Some(Piece::new(PieceKind::Knight, by)) {
                    return true;
                }
            }
        }
        for delta in KING_DELTAS {
            if let Some(from) = shift(sq, delta) {
                if self.piece_at(from) == Some(Piece::new(PieceKind::King, by)) {
                    return true;
                }
            }
        }
        for ray in BISHOP_RAYS {
            if self.ray_hits(sq, ray, by, PieceKind::Bishop) {
                return true;
            }
        }
        for ray in ROOK_RAYS {
            if self.ray_hits(sq, ray, by, PieceKind::Rook) {
                return true;
            }
        }
        false
    }

    fn ray_hits(&self, from: Square, ray: (i32, i32), by: Color, slider: PieceKind) -> bool {
        let mut current = from;
        while let Some(next) = shift(current, ray) {
            current = next;
            match self.piece_at(current) {
                Some(piece) => {
                    return piece.color == by
                        && (piece.kind == slider || piece.kind == PieceKind::Queen);
                }
                None => continue,
            }
        }
        false
    }

    fn pseudo_legal_moves(&self, color: Color) -> Vec<Move> {
        let mut moves = Vec::with_capacity(64);
        for (from, piece) in self.pieces().filter(|(_, p)| p.color == color) {
            match piece.kind {
                PieceKind::Pawn => self.pawn_moves(from, color, &mut moves),
                PieceKind::Knight => self.leaper_moves(from, color, &KNIGHT_DELTAS, &mut moves),
                PieceKind::King => {
                    self.leaper_moves(from, color, &KING_DELTAS, &mut moves);
                    self.castle_moves(from, color, &mut moves);
                }
                PieceKind::Bishop => self.slider_moves(from, color, &BISHOP_RAYS, &mut moves),
                PieceKind::Rook => self.slider_moves(from, color, &ROOK_RAYS, &mut moves),
                PieceKind::Queen => {
                    self.slider_moves(from, color, &BISHOP_RAYS, &mut moves);
                    self.slider_moves(from, color, &ROOK_RAYS, &mut moves);
                }
            }
        }
        moves
    }

    fn pawn_moves(&self, from: Square, color: Color, moves: &mut Vec<Move>) {
        let dir = if color.is_white() { 1 } else { -1 };
        let start_rank = if color.is_white() { 1 } else { 6 };
        let promo_rank = if color.is_white() { 7 } else { 0 };

        if let Some(one) = shift(from, (0, dir)) {
            if self.piece_at(one).is_none() {
                push_pawn_move(from, one, promo_rank, moves);
                if from.rank() == start_rank {
                    if let Some(two) = shift(from, (0, 2 * dir)) {
                        if self.piece_at(two).is_none() {
                            moves.push(Move::new(from, two));
                        }
                    }
                }
            }
        }
        for df in [-1, 1] {
            if let Some(target) = shift(from, (df, dir)) {
                let capturable = self
                    .piece_at(target)
                    .is_some_and(|victim| victim.color != color);
                if capturable || Some(target) == self.en_passant() {
                    push_pawn_move(from, target, promo_rank, moves);
                }
            }
        }
    }

    fn leaper_moves(&self, from: Square, color: Color, deltas: &[(i32, i32)], moves: &mut Vec<Move>) {
        for &delta in deltas {
            if let Some(to) = shift(from, delta) {
                if self.piece_at(to).is_none_or(|p| p.color != color) {
                    moves.push(Move::new(from, to));
                }
            }
        }
    }

    fn slider_moves(&self, from: Square, color: Color, rays: &[(i32, i32)], moves: &mut Vec<Move>) {
        for &ray in rays {
            let mut current = from;
            while let Some(to) = shift(current, ray) {
                current = to;
                match self.piece_at(to) {
                    None => moves.push(Move::new(from, to)),
                    Some(piece) => {
                        if piece.color != color {
                            moves.push(Move::new(from, to));
                        }
                        break;
                    }
                }
            }
        }
    }

    fn castle_moves(&self, from: Square, color: Color, moves: &mut Vec<Move>) {
        let (rank, kingside, queenside) = match color {
            Color::White => (0, CastlingRights::WHITE_KINGSIDE, CastlingRights::WHITE_QUEENSIDE),
            Color::Black => (7, CastlingRights::BLACK_KINGSIDE, CastlingRights::BLACK_QUEENSIDE),
        };
        if from != Square::from_file_rank(4, rank) || self.is_in_check(color) {
            return;
        }
        let enemy = color.opposite();
        if self.castling().has(kingside)
            && self.files_empty(rank, &[5, 6])
            && !self.is_attacked(Square::from_file_rank(5, rank), enemy)
            && !self.is_attacked(Square::from_file_rank(6, rank), enemy)
        {
            moves.push(Move::new(from, Square::from_file_rank(6, rank)));
        }
        if self.castling().has(queenside)
            && self.files_empty(rank, &[1, 2, 3])
            && !self.is_attacked(Square::from_file_rank(3, rank), enemy)
            && !self.is_attacked(Square::from_file_rank(2, rank), enemy)
        {
            moves.push(Move::new(from, Square::from_file_rank(2, rank)));
        }
    }

    fn files_empty(&self, rank: u8, files: &[u8]) -> bool {
        files
            .iter()
            .all(|&file| self.piece_at(Square::from_file_rank(file, rank)).is_none())
    }
}

fn push_pawn_move(from: Square, to: Square, promo_rank: u8, moves: &mut Vec<Move>) {
    use PieceKind::*;
    if to.rank() == promo_rank {
        for kind in [Queen, Rook, Bishop, Knight] {
            moves.push(Move::promoting(from, to, kind));
        }
    } else {
        moves.push(Move::new(from, to));
    }
}
