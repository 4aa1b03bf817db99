//! Session error types

use std::time::Duration;

use chess_core::pgn::RecordError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Engine is busy with another request")]
    Busy,

    #[error("Engine I/O error: {0}")]
    Io(String),

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("Engine did not answer within {0:?} of the search limit")]
    Unresponsive(Duration),

    #[error("Engine found no move within {0:?}")]
    NoMove(Duration),

    #[error("Engine connection is broken, restart required")]
    Broken,

    #[error("Engine proposed an illegal move: {0}")]
    IllegalMove(String),

    #[error("Engine reported no evaluation")]
    NoEvaluation,

    #[error("Engine rejected option {name}: {reason}")]
    OptionRejected { name: String, reason: String },
}

impl EngineError {
    /// Errors after which the protocol stream can no longer be trusted.
    pub fn poisons(&self) -> bool {
        matches!(
            self,
            EngineError::Io(_) | EngineError::Protocol(_) | EngineError::Unresponsive(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Record(#[from] RecordError),
}
