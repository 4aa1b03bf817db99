//! Game state on top of shakmaty: move history, repetition tracking and a
//! cached terminal classification.

use std::collections::HashMap;

use shakmaty::{
    fen::Fen, san::San, uci::UciMove, CastlingMode, Chess, Color, EnPassantMode, Move, Position,
    Rank, Role, Square,
};
use thiserror::Error;

/// Pieces a pawn may promote to, in the order a view should offer them.
pub const PROMOTION_ROLES: [Role; 4] = [Role::Queen, Role::Rook, Role::Bishop, Role::Knight];

/// Halfmove clock value at which the 75-move rule ends the game
const SEVENTY_FIVE_MOVE_HALFMOVES: u32 = 150;

/// Occurrences of one position that end the game (fivefold repetition)
const FIVEFOLD: u32 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    #[error("Illegal move {uci} in position {fen}")]
    IllegalMove { uci: String, fen: String },

    #[error("Invalid UCI move: {0}")]
    InvalidUci(String),

    #[error("Not a promotion piece: {0}")]
    InvalidPromotion(char),

    #[error("Invalid FEN: {0}")]
    InvalidFen(String),
}

/// Terminal classification of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameOutcome {
    Ongoing,
    Checkmate { winner: Color },
    Stalemate,
    InsufficientMaterial,
    SeventyFiveMoves,
    Repetition,
    /// Draw that the board itself does not show, e.g. agreed in a loaded record
    OtherDraw,
}

impl GameOutcome {
    pub fn is_terminal(self) -> bool {
        self != GameOutcome::Ongoing
    }

    /// PGN result token
    pub fn result_token(self) -> &'static str {
        match self {
            GameOutcome::Ongoing => "*",
            GameOutcome::Checkmate { winner: Color::White } => "1-0",
            GameOutcome::Checkmate { winner: Color::Black } => "0-1",
            _ => "1/2-1/2",
        }
    }

    pub fn describe(self) -> String {
        match self {
            GameOutcome::Ongoing => "Game in progress".to_string(),
            GameOutcome::Checkmate { winner } => {
                format!("Checkmate! {} wins!", color_name(winner))
            }
            GameOutcome::Stalemate => "Draw by stalemate!".to_string(),
            GameOutcome::InsufficientMaterial => "Draw by insufficient material!".to_string(),
            GameOutcome::SeventyFiveMoves => "Draw by the 75-move rule!".to_string(),
            GameOutcome::Repetition => "Draw by fivefold repetition!".to_string(),
            GameOutcome::OtherDraw => "Game drawn".to_string(),
        }
    }
}

pub fn color_name(color: Color) -> &'static str {
    match color {
        Color::White => "White",
        Color::Black => "Black",
    }
}

/// A game in progress: the current position plus everything needed to
/// replay, annotate and classify it.
#[derive(Debug, Clone)]
pub struct Game {
    start: Chess,
    start_fen: Option<String>,
    position: Chess,
    moves: Vec<Move>,
    san_moves: Vec<String>,
    repetitions: HashMap<String, u32>,
    outcome: GameOutcome,
}

impl Default for Game {
    fn default() -> Self {
        Self::from_position(Chess::default(), None)
    }
}

impl Game {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary setup instead of the standard arrangement.
    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        let parsed: Fen = fen
            .parse()
            .map_err(|e| RulesError::InvalidFen(format!("{fen}: {e}")))?;
        let position: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| RulesError::InvalidFen(format!("{fen}: {e}")))?;
        Ok(Self::from_position(position, Some(fen.trim().to_string())))
    }

    fn from_position(position: Chess, start_fen: Option<String>) -> Self {
        let mut game = Self {
            start: position.clone(),
            start_fen,
            position,
            moves: Vec::new(),
            san_moves: Vec::new(),
            repetitions: HashMap::new(),
            outcome: GameOutcome::Ongoing,
        };
        game.record_repetition();
        game.outcome = game.classify();
        game
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    pub fn start_position(&self) -> &Chess {
        &self.start
    }

    /// FEN of the initial setup, `None` for the standard arrangement
    pub fn start_fen(&self) -> Option<&str> {
        self.start_fen.as_deref()
    }

    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn san_moves(&self) -> &[String] {
        &self.san_moves
    }

    pub fn last_move(&self) -> Option<&Move> {
        self.moves.last()
    }

    pub fn ply(&self) -> usize {
        self.moves.len()
    }

    /// Cached classification, recomputed only when a move is applied.
    pub fn outcome(&self) -> GameOutcome {
        self.outcome
    }

    pub fn is_over(&self) -> bool {
        self.outcome.is_terminal()
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    pub fn has_legal_moves(&self) -> bool {
        !self.position.legal_moves().is_empty()
    }

    /// Legal moves whose origin is `from`.
    pub fn legal_moves_from(&self, from: Square) -> Vec<Move> {
        self.position
            .legal_moves()
            .into_iter()
            .filter(|m| m.from() == Some(from))
            .collect()
    }

    /// Destination squares for the piece on `from`, with castling reported
    /// as the king's target square. Promotions collapse to one entry.
    pub fn legal_targets(&self, from: Square) -> Vec<Square> {
        let mut targets = Vec::new();
        for m in self.legal_moves_from(from) {
            if let Some((_, to, _)) = uci_parts(&m) {
                if !targets.contains(&to) {
                    targets.push(to);
                }
            }
        }
        targets
    }

    /// Find the legal move matching a from/to pair and promotion choice.
    pub fn find_move(&self, from: Square, to: Square, promotion: Option<Role>) -> Option<Move> {
        self.position.legal_moves().into_iter().find(|m| {
            uci_parts(m).is_some_and(|(f, t, p)| f == from && t == to && p == promotion)
        })
    }

    /// True when some legal pawn move from `from` lands on `to` and needs a
    /// promotion piece to be complete.
    pub fn is_promotion_attempt(&self, from: Square, to: Square) -> bool {
        let Some(piece) = self.position.board().piece_at(from) else {
            return false;
        };
        if piece.role != Role::Pawn || to.rank() != last_rank(piece.color) {
            return false;
        }
        self.legal_moves_from(from)
            .iter()
            .any(|m| m.is_promotion() && uci_parts(m).is_some_and(|(_, t, _)| t == to))
    }

    /// Apply a move after validating it against the legal-move set.
    pub fn play(&mut self, m: Move) -> Result<GameOutcome, RulesError> {
        if !self.position.legal_moves().contains(&m) {
            return Err(RulesError::IllegalMove {
                uci: m.to_uci(CastlingMode::Standard).to_string(),
                fen: self.fen(),
            });
        }

        let san = San::from_move(&self.position, m.clone()).to_string();
        let next = self
            .position
            .clone()
            .play(m.clone())
            .map_err(|_| RulesError::IllegalMove {
                uci: m.to_uci(CastlingMode::Standard).to_string(),
                fen: self.fen(),
            })?;

        let suffix = if next.is_checkmate() {
            "#"
        } else if next.is_check() {
            "+"
        } else {
            ""
        };

        self.position = next;
        self.moves.push(m);
        self.san_moves.push(format!("{san}{suffix}"));
        self.record_repetition();
        self.outcome = self.classify();
        Ok(self.outcome)
    }

    /// Parse and apply a move in UCI notation (`e2e4`, `e7e8q`).
    pub fn play_uci(&mut self, uci: &str) -> Result<GameOutcome, RulesError> {
        let parsed: UciMove = uci
            .parse()
            .map_err(|_| RulesError::InvalidUci(uci.to_string()))?;
        let m = parsed
            .to_move(&self.position)
            .map_err(|_| RulesError::IllegalMove {
                uci: uci.to_string(),
                fen: self.fen(),
            })?;
        self.play(m)
    }

    /// Parse and apply a move in SAN (`Nf3`, `exd8=Q+`).
    pub fn play_san(&mut self, san: &str) -> Result<GameOutcome, RulesError> {
        let parsed: San = san
            .trim_end_matches(['+', '#', '!', '?'])
            .parse()
            .map_err(|_| RulesError::InvalidUci(san.to_string()))?;
        let m = parsed
            .to_move(&self.position)
            .map_err(|_| RulesError::IllegalMove {
                uci: san.to_string(),
                fen: self.fen(),
            })?;
        self.play(m)
    }

    /// Mark an ongoing game as drawn without a board reason.
    pub fn declare_draw(&mut self) {
        if self.outcome == GameOutcome::Ongoing {
            self.outcome = GameOutcome::OtherDraw;
        }
    }

    pub fn uci_moves(&self) -> Vec<String> {
        self.moves
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
            .collect()
    }

    /// UCI `position` command reproducing this game, move list included so
    /// the engine sees the repetition history.
    pub fn uci_position_command(&self) -> String {
        let mut cmd = match &self.start_fen {
            Some(fen) => format!("position fen {fen}"),
            None => "position startpos".to_string(),
        };
        if !self.moves.is_empty() {
            cmd.push_str(" moves ");
            cmd.push_str(&self.uci_moves().join(" "));
        }
        cmd
    }

    /// Move list grouped by move number: `["1. e4 e5", "2. Nf3"]`.
    pub fn numbered_history(&self) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        let mut number = self.start.fullmoves().get();
        let mut white_to_move = self.start.turn() == Color::White;

        for san in &self.san_moves {
            if white_to_move {
                lines.push(format!("{number}. {san}"));
            } else if lines.is_empty() {
                lines.push(format!("{number}... {san}"));
            } else if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(san);
            }
            if !white_to_move {
                number += 1;
            }
            white_to_move = !white_to_move;
        }

        lines
    }

    fn record_repetition(&mut self) {
        *self
            .repetitions
            .entry(repetition_key(&self.position))
            .or_insert(0) += 1;
    }

    fn classify(&self) -> GameOutcome {
        let pos = &self.position;
        if pos.is_checkmate() {
            GameOutcome::Checkmate {
                winner: !pos.turn(),
            }
        } else if pos.is_stalemate() {
            GameOutcome::Stalemate
        } else if pos.is_insufficient_material() {
            GameOutcome::InsufficientMaterial
        } else if pos.halfmoves() >= SEVENTY_FIVE_MOVE_HALFMOVES {
            GameOutcome::SeventyFiveMoves
        } else if self
            .repetitions
            .get(&repetition_key(pos))
            .is_some_and(|&n| n >= FIVEFOLD)
        {
            GameOutcome::Repetition
        } else {
            GameOutcome::Ongoing
        }
    }
}

pub fn last_rank(color: Color) -> Rank {
    match color {
        Color::White => Rank::Eighth,
        Color::Black => Rank::First,
    }
}

/// From/to/promotion in UCI terms, so castling reads as the king's move.
fn uci_parts(m: &Move) -> Option<(Square, Square, Option<Role>)> {
    match m.to_uci(CastlingMode::Standard) {
        UciMove::Normal {
            from,
            to,
            promotion,
        } => Some((from, to, promotion)),
        _ => None,
    }
}

/// Placement, side to move, castling and en passant rights; counters dropped.
fn repetition_key(pos: &Chess) -> String {
    let fen = Fen::from_position(pos, EnPassantMode::Legal).to_string();
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(name: &str) -> Square {
        name.parse().unwrap()
    }

    #[test]
    fn test_play_flips_turn_and_records_history() {
        let mut game = Game::new();
        game.play_uci("e2e4").unwrap();
        assert_eq!(game.turn(), Color::Black);
        assert_eq!(game.ply(), 1);
        assert_eq!(game.san_moves(), ["e4"]);
        assert_eq!(game.uci_moves(), ["e2e4"]);
    }

    #[test]
    fn test_illegal_move_is_rejected_without_mutation() {
        let mut game = Game::new();
        let err = game.play_uci("e2e5").unwrap_err();
        assert!(matches!(err, RulesError::IllegalMove { .. }));
        assert_eq!(game.ply(), 0);
        assert_eq!(game.turn(), Color::White);
    }

    #[test]
    fn test_fools_mate_is_checkmate_for_black() {
        let mut game = Game::new();
        for uci in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            game.play_uci(uci).unwrap();
        }
        assert_eq!(
            game.outcome(),
            GameOutcome::Checkmate {
                winner: Color::Black
            }
        );
        assert_eq!(game.san_moves().last().unwrap(), "Qh4#");
        assert_eq!(game.outcome().result_token(), "0-1");
        assert!(!game.has_legal_moves());
    }

    #[test]
    fn test_stalemate() {
        let mut game = Game::from_fen("k7/8/8/1Q6/8/8/8/7K w - - 0 1").unwrap();
        assert_eq!(game.play_uci("b5b6").unwrap(), GameOutcome::Stalemate);
        assert_eq!(game.outcome(), GameOutcome::Stalemate);
        assert!(!game.has_legal_moves());
    }

    #[test]
    fn test_insufficient_material() {
        let mut game = Game::from_fen("4k3/8/8/8/8/8/4n3/4K3 w - - 0 1").unwrap();
        assert_eq!(
            game.play_uci("e1e2").unwrap(),
            GameOutcome::InsufficientMaterial
        );
    }

    #[test]
    fn test_seventy_five_move_rule() {
        let mut game = Game::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 149 120").unwrap();
        assert_eq!(game.outcome(), GameOutcome::Ongoing);
        assert_eq!(game.play_uci("a1a2").unwrap(), GameOutcome::SeventyFiveMoves);
    }

    #[test]
    fn test_fivefold_repetition() {
        let mut game = Game::new();
        for _ in 0..3 {
            for uci in ["g1f3", "g8f6", "f3g1", "f6g8"] {
                assert_eq!(game.play_uci(uci).unwrap(), GameOutcome::Ongoing);
            }
        }
        for uci in ["g1f3", "g8f6", "f3g1"] {
            game.play_uci(uci).unwrap();
        }
        assert_eq!(game.play_uci("f6g8").unwrap(), GameOutcome::Repetition);
    }

    #[test]
    fn test_legal_targets_report_castling_as_king_move() {
        let game = Game::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let targets = game.legal_targets(sq("e1"));
        assert!(targets.contains(&sq("g1")));
        assert!(targets.contains(&sq("c1")));
        assert!(game.find_move(sq("e1"), sq("g1"), None).is_some());
    }

    #[test]
    fn test_promotion_attempt_detection() {
        let game = Game::from_fen("1n2k3/P7/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert!(game.is_promotion_attempt(sq("a7"), sq("a8")));
        assert!(game.is_promotion_attempt(sq("a7"), sq("b8")));
        assert!(!game.is_promotion_attempt(sq("e1"), sq("e2")));
        assert_eq!(game.legal_targets(sq("a7")).len(), 2);
        assert!(game.find_move(sq("a7"), sq("a8"), None).is_none());
        assert!(game
            .find_move(sq("a7"), sq("a8"), Some(Role::Knight))
            .is_some());
    }

    #[test]
    fn test_numbered_history() {
        let mut game = Game::new();
        for uci in ["e2e4", "e7e5", "g1f3"] {
            game.play_uci(uci).unwrap();
        }
        assert_eq!(game.numbered_history(), ["1. e4 e5", "2. Nf3"]);
    }

    #[test]
    fn test_numbered_history_from_black_to_move() {
        let mut game =
            Game::from_fen("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1").unwrap();
        game.play_uci("e7e5").unwrap();
        game.play_uci("g1f3").unwrap();
        assert_eq!(game.numbered_history(), ["1... e5", "2. Nf3"]);
    }

    #[test]
    fn test_position_command() {
        let mut game = Game::new();
        assert_eq!(game.uci_position_command(), "position startpos");
        game.play_uci("e2e4").unwrap();
        assert_eq!(game.uci_position_command(), "position startpos moves e2e4");
    }
}
