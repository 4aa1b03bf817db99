pub mod game_data;
pub mod pgn;
pub mod rules;

pub use game_data::{GameMetadata, GameRecord};
pub use rules::{Game, GameOutcome, RulesError, PROMOTION_ROLES};
