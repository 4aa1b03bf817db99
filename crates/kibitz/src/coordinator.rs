//! Move coordination between the human, the rules and the engine.
//!
//! The coordinator owns the game. Engine work runs on a background task
//! with an owned snapshot of the position; `advance()` is called once per
//! frame, collects finished replies and dispatches the next request. Every
//! request is tagged with the game generation and ply it was made for, so
//! a reply that arrives after a restart, load or move is dropped.

use std::time::Duration;

use chess_core::game_data::{GameMetadata, GameRecord};
use chess_core::pgn::{self, RecordError};
use chess_core::{Game, GameOutcome, PROMOTION_ROLES};
use shakmaty::{CastlingMode, Color, Move, Position, Role, Square};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::handle::EngineHandle;
use crate::stockfish::{EvaluationScore, SearchRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub human: Color,
    pub skill_level: u8,
    pub move_delay: Duration,
    pub analyze_time: Duration,
    pub play_time: Duration,
    pub suggest_time: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            human: Color::White,
            skill_level: 10,
            move_delay: Duration::from_millis(1000),
            analyze_time: Duration::from_millis(100),
            play_time: Duration::from_millis(1000),
            suggest_time: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    WaitingForHuman,
    HumanSelecting,
    AwaitingPromotionChoice,
    EngineThinking,
    GameOver,
}

/// What the engine is currently doing for the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingKind {
    Idle,
    Analyzing,
    SelectingMove,
    Suggesting,
    Configuring,
    Restarting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingState {
    pub kind: ThinkingKind,
    /// When the last move (either side) was applied
    pub last_move_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub square: Square,
    pub targets: Vec<Square>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPromotion {
    pub from: Square,
    pub to: Square,
    pub side: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Ignored,
    Selected,
    Deselected,
    Rejected,
    PromotionRequired,
    Moved(GameOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    /// A request is still running
    Waiting,
    /// The engine may move but the move delay has not passed
    Throttled,
    /// The engine is held by someone else; retried next tick
    Busy,
    Dispatched(ThinkingKind),
    Completed(ThinkingKind),
}

#[derive(Debug, Clone, Copy)]
enum Request {
    Analyze,
    Play,
    Suggest,
    Configure(u8),
    Respawn,
}

impl Request {
    fn kind(self) -> ThinkingKind {
        match self {
            Request::Analyze => ThinkingKind::Analyzing,
            Request::Play => ThinkingKind::SelectingMove,
            Request::Suggest => ThinkingKind::Suggesting,
            Request::Configure(_) => ThinkingKind::Configuring,
            Request::Respawn => ThinkingKind::Restarting,
        }
    }
}

enum Reply {
    Evaluation(EvaluationScore),
    Move(Move),
    Suggestion(Move),
    Configured(u8),
    Respawned,
}

struct InFlight {
    kind: ThinkingKind,
    generation: u64,
    ply: usize,
    rx: oneshot::Receiver<Result<Reply, EngineError>>,
}

pub struct MoveCoordinator {
    engine: EngineHandle,
    settings: CoordinatorSettings,
    game: Game,
    selection: Option<Selection>,
    pending_promotion: Option<PendingPromotion>,
    analysis_mode: bool,
    show_hints: bool,
    thinking: ThinkingState,
    in_flight: Option<InFlight>,
    generation: u64,
    evaluation: Option<EvaluationScore>,
    evaluated_ply: Option<usize>,
    suggestion: Option<Move>,
    message: Option<String>,
    needs_configure: bool,
    needs_respawn: bool,
}

impl MoveCoordinator {
    /// The engine's skill level is applied on the first `advance()`.
    pub fn new(engine: EngineHandle, settings: CoordinatorSettings) -> Self {
        Self {
            engine,
            settings,
            game: Game::new(),
            selection: None,
            pending_promotion: None,
            analysis_mode: false,
            show_hints: true,
            thinking: ThinkingState {
                kind: ThinkingKind::Idle,
                last_move_at: None,
            },
            in_flight: None,
            generation: 0,
            evaluation: None,
            evaluated_ply: None,
            suggestion: None,
            message: None,
            needs_configure: true,
            needs_respawn: false,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        if self.pending_promotion.is_some() {
            CoordinatorState::AwaitingPromotionChoice
        } else if self.game.is_over() && !self.analysis_mode {
            CoordinatorState::GameOver
        } else if self.engine_to_move() || self.move_in_flight() {
            CoordinatorState::EngineThinking
        } else if self.selection.is_some() {
            CoordinatorState::HumanSelecting
        } else {
            CoordinatorState::WaitingForHuman
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn human_color(&self) -> Color {
        self.settings.human
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn pending_promotion(&self) -> Option<PendingPromotion> {
        self.pending_promotion
    }

    pub fn analysis_mode(&self) -> bool {
        self.analysis_mode
    }

    pub fn show_hints(&self) -> bool {
        self.show_hints
    }

    pub fn thinking(&self) -> ThinkingState {
        self.thinking
    }

    pub fn evaluation(&self) -> Option<EvaluationScore> {
        self.evaluation
    }

    pub fn suggestion(&self) -> Option<&Move> {
        self.suggestion.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    fn engine_to_move(&self) -> bool {
        self.game.turn() != self.settings.human
            && self.game.has_legal_moves()
            && (!self.game.is_over() || self.analysis_mode)
    }

    fn move_in_flight(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.kind == ThinkingKind::SelectingMove)
    }

    /// Handle a click on a board square.
    pub fn handle_click(&mut self, square: Square) -> ClickOutcome {
        if self.pending_promotion.is_some()
            || (self.game.is_over() && !self.analysis_mode)
            || self.move_in_flight()
            || (!self.analysis_mode && self.game.turn() != self.settings.human)
        {
            return ClickOutcome::Ignored;
        }

        let Some(selection) = self.selection.take() else {
            return self.select(square);
        };

        if selection.square == square {
            return ClickOutcome::Deselected;
        }

        // Clicking another own piece switches the selection
        let own_piece = self
            .game
            .position()
            .board()
            .piece_at(square)
            .is_some_and(|p| p.color == self.game.turn());
        if own_piece && !selection.targets.contains(&square) {
            return self.select(square);
        }

        if self.game.is_promotion_attempt(selection.square, square) {
            self.pending_promotion = Some(PendingPromotion {
                from: selection.square,
                to: square,
                side: self.game.turn(),
            });
            self.selection = Some(selection);
            return ClickOutcome::PromotionRequired;
        }

        match self.game.find_move(selection.square, square, None) {
            Some(m) => self.apply_human_move(m),
            None => {
                debug!(from = %selection.square, to = %square, "Illegal move attempt");
                ClickOutcome::Rejected
            }
        }
    }

    fn select(&mut self, square: Square) -> ClickOutcome {
        let own_piece = self
            .game
            .position()
            .board()
            .piece_at(square)
            .is_some_and(|p| p.color == self.game.turn());
        if !own_piece {
            return ClickOutcome::Ignored;
        }
        self.selection = Some(Selection {
            square,
            targets: self.game.legal_targets(square),
        });
        ClickOutcome::Selected
    }

    /// Complete a pending promotion with the chosen piece.
    pub fn choose_promotion(&mut self, role: Role) -> ClickOutcome {
        let Some(pending) = self.pending_promotion else {
            return ClickOutcome::Ignored;
        };
        if !PROMOTION_ROLES.contains(&role) {
            return ClickOutcome::Rejected;
        }
        match self.game.find_move(pending.from, pending.to, Some(role)) {
            Some(m) => self.apply_human_move(m),
            None => {
                self.cancel_promotion();
                ClickOutcome::Rejected
            }
        }
    }

    pub fn cancel_promotion(&mut self) {
        self.pending_promotion = None;
        self.selection = None;
    }

    fn apply_human_move(&mut self, m: Move) -> ClickOutcome {
        match self.apply_move(m) {
            Ok(outcome) => ClickOutcome::Moved(outcome),
            Err(e) => {
                warn!(error = %e, "Human move rejected by rules");
                self.selection = None;
                self.pending_promotion = None;
                ClickOutcome::Rejected
            }
        }
    }

    fn apply_move(&mut self, m: Move) -> Result<GameOutcome, chess_core::RulesError> {
        let uci = m.to_uci(CastlingMode::Standard).to_string();
        let outcome = self.game.play(m)?;
        self.selection = None;
        self.pending_promotion = None;
        self.suggestion = None;
        self.message = None;
        self.thinking.last_move_at = Some(Instant::now());
        info!(mv = %uci, ply = self.game.ply(), "Move applied");
        if outcome.is_terminal() {
            info!(?outcome, "Game over");
            self.message = Some(outcome.describe());
        }
        Ok(outcome)
    }

    /// Drive engine work: collect a finished reply or start the next request.
    pub fn advance(&mut self) -> Tick {
        if self.in_flight.is_some() {
            return self.poll_in_flight();
        }

        if self.needs_respawn {
            return self.dispatch(Request::Respawn);
        }
        if self.needs_configure {
            return self.dispatch(Request::Configure(self.settings.skill_level));
        }

        if self.pending_promotion.is_some() || !self.engine_to_move() {
            return Tick::Idle;
        }
        let delay_passed = self
            .thinking
            .last_move_at
            .map_or(true, |t| t.elapsed() >= self.settings.move_delay);
        if !delay_passed {
            return Tick::Throttled;
        }

        if self.evaluated_ply == Some(self.game.ply()) {
            self.dispatch(Request::Play)
        } else {
            self.dispatch(Request::Analyze)
        }
    }

    /// Ask the engine for a move suggestion on the current position.
    pub fn request_suggestion(&mut self) -> Result<(), EngineError> {
        if self.in_flight.is_some() {
            return Err(EngineError::Busy);
        }
        if !self.game.has_legal_moves() {
            return Ok(());
        }
        match self.dispatch(Request::Suggest) {
            Tick::Dispatched(_) => Ok(()),
            _ => Err(EngineError::Busy),
        }
    }

    fn dispatch(&mut self, request: Request) -> Tick {
        let kind = request.kind();
        let mut lease = match self.engine.try_acquire() {
            Ok(lease) => lease,
            Err(_) => return Tick::Busy,
        };

        let search = SearchRequest::from_game(&self.game);
        let settings = self.settings.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let reply = match request {
                Request::Analyze => lease
                    .analyze(&search, settings.analyze_time)
                    .await
                    .map(Reply::Evaluation),
                Request::Play => lease.play(&search, settings.play_time).await.map(Reply::Move),
                Request::Suggest => lease
                    .play(&search, settings.suggest_time)
                    .await
                    .map(Reply::Suggestion),
                Request::Configure(level) => {
                    lease.configure(level).await.map(|()| Reply::Configured(level))
                }
                Request::Respawn => lease.respawn().await.map(|()| Reply::Respawned),
            };
            // Release the engine before the coordinator sees the reply
            drop(lease);
            let _ = tx.send(reply);
        });

        debug!(?kind, ply = self.game.ply(), "Engine request dispatched");
        self.in_flight = Some(InFlight {
            kind,
            generation: self.generation,
            ply: self.game.ply(),
            rx,
        });
        self.thinking.kind = kind;
        Tick::Dispatched(kind)
    }

    fn poll_in_flight(&mut self) -> Tick {
        let Some(flight) = self.in_flight.as_mut() else {
            return Tick::Idle;
        };
        let result = match flight.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return Tick::Waiting,
            Err(TryRecvError::Closed) => Err(EngineError::Io("engine task ended without reply".into())),
        };
        let Some(flight) = self.in_flight.take() else {
            return Tick::Idle;
        };
        self.thinking.kind = ThinkingKind::Idle;

        if flight.generation != self.generation {
            debug!(kind = ?flight.kind, "Discarding reply from a previous game");
            // The lease was held when the game was reset, so the broken
            // check there could not see this failure
            if let Err(e) = &result {
                if e.poisons() || *e == EngineError::Broken {
                    warn!(error = %e, "Engine failed during the previous game, respawning");
                    self.needs_respawn = true;
                }
            }
            return Tick::Completed(flight.kind);
        }
        let current = flight.ply == self.game.ply();

        match result {
            Ok(Reply::Evaluation(score)) if current => {
                self.evaluation = Some(score);
                self.evaluated_ply = Some(flight.ply);
            }
            Ok(Reply::Move(m)) if current => self.apply_engine_move(m),
            Ok(Reply::Suggestion(m)) if current => {
                let uci = m.to_uci(CastlingMode::Standard);
                self.message = Some(format!("Suggested move: {uci}"));
                self.suggestion = Some(m);
            }
            Ok(Reply::Configured(level)) => {
                self.needs_configure = false;
                debug!(skill = level, "Engine configured");
            }
            Ok(Reply::Respawned) => self.needs_respawn = false,
            Ok(_) => debug!(kind = ?flight.kind, "Discarding reply for an earlier position"),
            Err(e) => self.report_engine_error(flight.kind, flight.ply, e),
        }
        Tick::Completed(flight.kind)
    }

    fn apply_engine_move(&mut self, m: Move) {
        if let Err(e) = self.apply_move(m) {
            self.report_engine_error(
                ThinkingKind::SelectingMove,
                self.game.ply(),
                EngineError::IllegalMove(e.to_string()),
            );
        }
    }

    fn report_engine_error(&mut self, kind: ThinkingKind, ply: usize, e: EngineError) {
        error!(error = %e, ?kind, "Engine request failed");
        match kind {
            // A skipped evaluation must not hold up the engine's move
            ThinkingKind::Analyzing => self.evaluated_ply = Some(ply),
            // The previous level stays in effect until the next restart
            ThinkingKind::Configuring => self.needs_configure = false,
            ThinkingKind::Restarting => self.needs_respawn = false,
            _ => {}
        }
        self.message = Some(format!("Engine error: {e}"));
        // Retry no sooner than one move delay
        self.thinking.last_move_at = Some(Instant::now());
    }

    pub fn toggle_analysis_mode(&mut self) -> bool {
        self.analysis_mode = !self.analysis_mode;
        self.selection = None;
        self.message = Some(if self.analysis_mode {
            "Analysis mode enabled".to_string()
        } else {
            "Analysis mode disabled".to_string()
        });
        info!(enabled = self.analysis_mode, "Analysis mode toggled");
        self.analysis_mode
    }

    pub fn toggle_hints(&mut self) -> bool {
        self.show_hints = !self.show_hints;
        self.show_hints
    }

    /// Start over from the standard position with the current settings.
    pub fn restart(&mut self) {
        self.reset(Game::new());
        info!("Game restarted");
    }

    /// Start a new game with a different side or skill level.
    pub fn start_new_game(&mut self, human: Color, skill_level: u8) {
        self.settings.human = human;
        self.settings.skill_level = skill_level;
        self.reset(Game::new());
        info!(human = ?human, skill = skill_level, "New game started");
    }

    fn reset(&mut self, game: Game) {
        // The running request, if any, completes into the old generation
        self.generation += 1;
        self.game = game;
        self.selection = None;
        self.pending_promotion = None;
        self.analysis_mode = false;
        self.evaluation = None;
        self.evaluated_ply = None;
        self.suggestion = None;
        self.message = None;
        self.thinking.last_move_at = None;
        self.needs_configure = true;
        self.needs_respawn = self.engine.is_broken();
    }

    /// Replace the game with a replayed record.
    pub fn load_record(&mut self, record: &GameRecord) -> Result<(), RecordError> {
        let game = pgn::replay(record)?;
        if let Some(human) = record.metadata.human_color() {
            self.settings.human = human;
        }
        self.reset(game);
        info!(moves = record.moves.len(), "Game record loaded");
        if self.game.is_over() {
            self.message = Some(self.game.outcome().describe());
        } else {
            self.message = Some("Game loaded".to_string());
        }
        Ok(())
    }

    /// Snapshot of the current game as a record.
    pub fn save_record(&self) -> GameRecord {
        let metadata = GameMetadata::for_session(self.settings.human, self.game.outcome());
        GameRecord::from_game(&self.game, metadata)
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }
}
