//! Engine-backed chess session: UCI engine process, move coordination and
//! a terminal front end.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod handle;
pub mod stockfish;
pub mod view;

pub use coordinator::{
    ClickOutcome, CoordinatorSettings, CoordinatorState, MoveCoordinator, ThinkingKind, Tick,
};
pub use error::{EngineError, SessionError};
pub use handle::{EngineHandle, EngineLease};
pub use stockfish::{EvaluationScore, SearchRequest, StockfishEngine};
