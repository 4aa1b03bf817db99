use shakmaty::Color;

use crate::rules::{Game, GameOutcome};

/// Label used for the engine side in saved records
pub const ENGINE_PLAYER: &str = "Stockfish";

/// Label used for the human side in saved records
pub const HUMAN_PLAYER: &str = "Player";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMetadata {
    pub event: String,
    pub site: String,
    pub date: Option<String>, // "YYYY.MM.DD"
    pub round: String,
    pub white: String,
    pub black: String,
    pub result: String, // "1-0", "0-1", "1/2-1/2", "*"
}

impl Default for GameMetadata {
    fn default() -> Self {
        Self {
            event: "Casual game".to_string(),
            site: "Local".to_string(),
            date: None,
            round: "1".to_string(),
            white: "?".to_string(),
            black: "?".to_string(),
            result: "*".to_string(),
        }
    }
}

impl GameMetadata {
    /// Metadata for a session where `human` played against the engine,
    /// dated today.
    pub fn for_session(human: Color, outcome: GameOutcome) -> Self {
        let (white, black) = match human {
            Color::White => (HUMAN_PLAYER, ENGINE_PLAYER),
            Color::Black => (ENGINE_PLAYER, HUMAN_PLAYER),
        };
        Self {
            date: Some(chrono::Local::now().format("%Y.%m.%d").to_string()),
            white: white.to_string(),
            black: black.to_string(),
            result: outcome.result_token().to_string(),
            ..Self::default()
        }
    }

    /// Side the human played, if the record came from a session.
    pub fn human_color(&self) -> Option<Color> {
        if self.white == HUMAN_PLAYER {
            Some(Color::White)
        } else if self.black == HUMAN_PLAYER {
            Some(Color::Black)
        } else {
            None
        }
    }
}

/// A game record at the load/save boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub metadata: GameMetadata,
    /// Starting FEN when the game did not begin from the standard setup
    pub start_fen: Option<String>,
    pub moves: Vec<String>, // SAN notation
}

impl GameRecord {
    pub fn from_game(game: &Game, metadata: GameMetadata) -> Self {
        Self {
            metadata,
            start_fen: game.start_fen().map(str::to_string),
            moves: game.san_moves().to_vec(),
        }
    }
}
