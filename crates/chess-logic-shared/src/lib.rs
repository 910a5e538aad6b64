//! Thin adapter over the `shakmaty` chess rules engine.
//!
//! Every operation here is pure over a [`Position`]: applying a move never
//! mutates `self`, it returns a new `Position`. The session engine is the
//! only thing that threads a `Position` through time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{Chess, Color, EnPassantMode, File, Move as ShakmatyMove, Position as _, Rank, Role};

pub use shakmaty::Square;

/// Which side a piece or player belongs to. Mirrors `shakmaty::Color` with
/// names that match the rest of this codebase (`Side::White`/`Side::Black`
/// rather than `Color::White`/`Color::Black`) so call sites read naturally
/// next to `SideToMove`, `winner: Option<Side>`, etc.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl From<Color> for Side {
    fn from(c: Color) -> Self {
        match c {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

impl From<Side> for Color {
    fn from(s: Side) -> Self {
        match s {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

/// A proposed move as it comes off the wire: either a coordinate pair with
/// an optional promotion piece, or a SAN string.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MoveDescriptor {
    Coordinate {
        from: String,
        to: String,
        promotion: Option<char>,
    },
    San(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum OracleError {
    #[error("illegal move")]
    Illegal,
    #[error("malformed move descriptor: {0}")]
    Malformed(String),
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
}

/// A single applied move, recorded in move-history order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedMove {
    pub san: String,
    pub from: Square,
    pub to: Square,
    pub piece: Role,
    pub mover: Side,
    pub captured: Option<Role>,
    pub promotion: Option<Role>,
}

/// Why the game ended, when it has.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    None,
    Checkmate,
    Stalemate,
    Draw(DrawReason),
}

impl Terminal {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Terminal::None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawReason {
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
}

/// The authoritative chess position plus the full move history that led to
/// it. Cheap to clone — `shakmaty::Chess` is small and `Vec<AppliedMove>`
/// only grows one entry per ply.
#[derive(Clone, Debug)]
pub struct Position {
    chess: Chess,
    history: Vec<AppliedMove>,
    repetitions: HashMap<u64, u8>,
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

impl Position {
    pub fn new() -> Self {
        let chess = Chess::default();
        let mut repetitions = HashMap::new();
        repetitions.insert(zobrist_key(&chess), 1);
        Self {
            chess,
            history: Vec::new(),
            repetitions,
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, OracleError> {
        let setup: Fen = fen.parse().map_err(|e| OracleError::InvalidFen(format!("{e}")))?;
        let chess: Chess = setup
            .into_position(shakmaty::CastlingMode::Standard)
            .map_err(|e| OracleError::InvalidFen(format!("{e}")))?;
        let mut repetitions = HashMap::new();
        repetitions.insert(zobrist_key(&chess), 1);
        Ok(Self {
            chess,
            history: Vec::new(),
            repetitions,
        })
    }

    pub fn turn(&self) -> Side {
        self.chess.turn().into()
    }

    pub fn history(&self) -> &[AppliedMove] {
        &self.history
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.chess.clone(), EnPassantMode::Legal).to_string()
    }

    pub fn terminal(&self) -> Terminal {
        if self.chess.is_checkmate() {
            return Terminal::Checkmate;
        }
        if self.chess.is_stalemate() {
            return Terminal::Stalemate;
        }
        if self.chess.is_insufficient_material() {
            return Terminal::Draw(DrawReason::InsufficientMaterial);
        }
        if self.chess.halfmoves() >= 100 {
            return Terminal::Draw(DrawReason::FiftyMoveRule);
        }
        if self
            .repetitions
            .get(&zobrist_key(&self.chess))
            .is_some_and(|&count| count >= 3)
        {
            return Terminal::Draw(DrawReason::ThreefoldRepetition);
        }
        Terminal::None
    }

    /// Apply a move, returning the resulting position. Never mutates `self`.
    pub fn apply(&self, descriptor: &MoveDescriptor) -> Result<Position, OracleError> {
        let mv = self.resolve(descriptor)?;
        self.apply_move(&mv)
    }

    fn resolve(&self, descriptor: &MoveDescriptor) -> Result<ShakmatyMove, OracleError> {
        match descriptor {
            MoveDescriptor::San(text) => {
                let san: San = text.parse().map_err(|e| OracleError::Malformed(format!("{e}")))?;
                san.to_move(&self.chess).map_err(|_| OracleError::Illegal)
            }
            MoveDescriptor::Coordinate { from, to, promotion } => {
                let from = parse_square(from)?;
                let to = parse_square(to)?;
                let promotion_role = match promotion {
                    Some(c) => Some(parse_role(*c)?),
                    None => None,
                };
                self.chess
                    .legal_moves()
                    .into_iter()
                    .find(|m| m.from() == Some(from) && m.to() == to && m.promotion() == promotion_role)
                    .ok_or(OracleError::Illegal)
            }
        }
    }

    fn apply_move(&self, mv: &ShakmatyMove) -> Result<Position, OracleError> {
        let san = San::from_move(&self.chess, mv).to_string();
        let mover = self.turn();
        let from = mv.from().ok_or(OracleError::Illegal)?;
        let to = mv.to();
        let piece = mv.role();
        let captured = mv.capture();
        let promotion = mv.promotion();

        let mut next = self.chess.clone();
        next.play_unchecked(mv.clone());

        let mut repetitions = self.repetitions.clone();
        *repetitions.entry(zobrist_key(&next)).or_insert(0) += 1;

        let mut history = self.history.clone();
        history.push(AppliedMove {
            san,
            from,
            to,
            piece,
            mover,
            captured,
            promotion,
        });

        Ok(Position {
            chess: next,
            history,
            repetitions,
        })
    }
}

fn zobrist_key(chess: &Chess) -> u64 {
    chess.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0
}

fn parse_square(s: &str) -> Result<Square, OracleError> {
    let bytes = s.as_bytes();
    if bytes.len() != 2 {
        return Err(OracleError::Malformed(format!("bad square '{s}'")));
    }
    let file_idx = bytes[0].to_ascii_lowercase().wrapping_sub(b'a');
    let rank_idx = bytes[1].wrapping_sub(b'1');
    if file_idx > 7 || rank_idx > 7 {
        return Err(OracleError::Malformed(format!("bad square '{s}'")));
    }
    let file = File::new(file_idx as u32);
    let rank = Rank::new(rank_idx as u32);
    Ok(Square::from_coords(file, rank))
}

fn parse_role(c: char) -> Result<Role, OracleError> {
    match c.to_ascii_lowercase() {
        'q' => Ok(Role::Queen),
        'r' => Ok(Role::Rook),
        'b' => Ok(Role::Bishop),
        'n' => Ok(Role::Knight),
        other => Err(OracleError::Malformed(format!("bad promotion piece '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(from: &str, to: &str) -> MoveDescriptor {
        MoveDescriptor::Coordinate {
            from: from.to_string(),
            to: to.to_string(),
            promotion: None,
        }
    }

    #[test]
    fn starting_position_turn_is_white() {
        let pos = Position::new();
        assert_eq!(pos.turn(), Side::White);
        assert_eq!(pos.terminal(), Terminal::None);
    }

    #[test]
    fn illegal_first_move_is_rejected() {
        let pos = Position::new();
        let err = pos.apply(&coord("e7", "e5")).unwrap_err();
        assert!(matches!(err, OracleError::Illegal));
    }

    #[test]
    fn fools_mate_ends_in_checkmate() {
        let pos = Position::new();
        let pos = pos.apply(&coord("f2", "f3")).unwrap();
        let pos = pos.apply(&coord("e7", "e5")).unwrap();
        let pos = pos.apply(&coord("g2", "g4")).unwrap();
        let pos = pos.apply(&coord("d8", "h4")).unwrap();

        assert_eq!(pos.terminal(), Terminal::Checkmate);
        assert_eq!(pos.history().len(), 4);
        assert_eq!(pos.history().last().unwrap().san, "Qh4#");
    }

    #[test]
    fn san_descriptor_applies_the_same_move_as_coordinates() {
        let pos = Position::new();
        let via_san = pos.apply(&MoveDescriptor::San("e4".to_string())).unwrap();
        let via_coord = pos.apply(&coord("e2", "e4")).unwrap();
        assert_eq!(via_san.fen(), via_coord.fen());
    }
}
