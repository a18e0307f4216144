use crate::chess::{Move, PieceKind, Square};

/// Dense from→to action encoding over the 64×64 square grid.
///
/// Promotions share the index of their underlying from→to pair; decoding
/// against a legal move list prefers the queen promotion, matching how the
/// training loop treats under-promotions as a refinement it does not explore.
pub struct ActionSpace;

impl ActionSpace {
    pub const SIZE: usize = 64 * 64;

    pub fn encode(mv: &Move) -> usize {
        mv.from.index() * 64 + mv.to.index()
    }

    pub fn decode_squares(action: usize) -> Option<(Square, Square)> {
        if action >= Self::SIZE {
            return None;
        }
        Some((Square((action / 64) as u8), Square((action % 64) as u8)))
    }

    /// Resolves an action index against the legal move list.
    ///
    /// An exact non-promotion match wins. When the pair only matches
    /// promotions, the queen promotion is chosen. `None` means the action does
    /// not correspond to any legal move.
    pub fn decode_legal(action: usize, legal: &[Move]) -> Option<Move> {
        let (from, to) = Self::decode_squares(action)?;
        let mut promotion_fallback = None;
        for mv in legal {
            if mv.from != from || mv.to != to {
                continue;
            }
            match mv.promotion {
                None => return Some(*mv),
                Some(PieceKind::Queen) => return Some(*mv),
                Some(_) => promotion_fallback = Some(*mv),
            }
        }
        promotion_fallback
    }

    /// Dense 0/1 mask over the whole action space.
    pub fn mask(legal: &[Move]) -> Vec<f64> {
        let mut mask = vec![0.0; Self::SIZE];
        for mv in legal {
            mask[Self::encode(mv)] = 1.0;
        }
        mask
    }

    /// Distinct action indices for a legal move list, sorted ascending.
    pub fn indices(legal: &[Move]) -> Vec<usize> {
        let mut indices: Vec<usize> = legal.iter().map(Self::encode).collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
