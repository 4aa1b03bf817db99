//! Input events delivered by the presentation layer, and the session that
//! routes them to the coordinator.

use std::path::{Path, PathBuf};

use chess_core::pgn;
use shakmaty::{Color, Role, Square};
use tracing::{info, warn};

use crate::coordinator::{ClickOutcome, CoordinatorState, MoveCoordinator, Tick};
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEvent {
    StartGame { human: Color, skill_level: u8 },
    LoadGame(PathBuf),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionEvent {
    Promote(Role),
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    Click(Square),
    Save(PathBuf),
    Suggest,
    ToggleAnalysis,
    ToggleHints,
    Restart,
    MainMenu,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Menu(MenuEvent),
    Promotion(PromotionEvent),
    Game(GameEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Menu,
    Game,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Session {
    coordinator: MoveCoordinator,
    screen: Screen,
}

impl Session {
    pub fn new(coordinator: MoveCoordinator) -> Self {
        Self {
            coordinator,
            screen: Screen::Menu,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn coordinator(&self) -> &MoveCoordinator {
        &self.coordinator
    }

    /// Per-frame update; the engine only runs while a game is on screen.
    pub fn tick(&mut self) -> Tick {
        match self.screen {
            Screen::Game => self.coordinator.advance(),
            Screen::Menu => Tick::Idle,
        }
    }

    pub fn handle(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Menu(event) => return self.handle_menu(event),
            SessionEvent::Promotion(event) => self.handle_promotion(event),
            SessionEvent::Game(event) => self.handle_game(event),
        }
        Flow::Continue
    }

    fn handle_menu(&mut self, event: MenuEvent) -> Flow {
        match event {
            MenuEvent::StartGame { human, skill_level } => {
                self.coordinator.start_new_game(human, skill_level);
                self.screen = Screen::Game;
            }
            MenuEvent::LoadGame(path) => match self.load_game(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "Loaded game");
                    self.screen = Screen::Game;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load game");
                    self.coordinator.set_message(format!("Load failed: {e}"));
                }
            },
            MenuEvent::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn load_game(&mut self, path: &Path) -> Result<(), SessionError> {
        let (record, _) = pgn::load_file(path)?;
        self.coordinator.load_record(&record)?;
        Ok(())
    }

    fn save_game(&self, path: &Path) -> Result<(), SessionError> {
        pgn::save_file(path, &self.coordinator.save_record())?;
        Ok(())
    }

    fn handle_promotion(&mut self, event: PromotionEvent) {
        if self.coordinator.state() != CoordinatorState::AwaitingPromotionChoice {
            return;
        }
        match event {
            PromotionEvent::Promote(role) => {
                if self.coordinator.choose_promotion(role) == ClickOutcome::Rejected {
                    self.coordinator
                        .set_message("Choose queen, rook, bishop or knight");
                }
            }
            PromotionEvent::Cancel => self.coordinator.cancel_promotion(),
        }
    }

    fn handle_game(&mut self, event: GameEvent) {
        if self.screen != Screen::Game {
            return;
        }
        match event {
            GameEvent::Click(square) => {
                self.coordinator.handle_click(square);
            }
            GameEvent::Save(path) => match self.save_game(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "Saved game");
                    self.coordinator
                        .set_message(format!("Game saved to {}", path.display()));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to save game");
                    self.coordinator.set_message(format!("Save failed: {e}"));
                }
            },
            GameEvent::Suggest => {
                if let Err(e) = self.coordinator.request_suggestion() {
                    self.coordinator
                        .set_message(format!("Cannot suggest right now: {e}"));
                }
            }
            GameEvent::ToggleAnalysis => {
                self.coordinator.toggle_analysis_mode();
            }
            GameEvent::ToggleHints => {
                self.coordinator.toggle_hints();
            }
            GameEvent::Restart => self.coordinator.restart(),
            GameEvent::MainMenu => {
                // Pending work is left to finish and is discarded by the next game
                self.coordinator.cancel_promotion();
                self.screen = Screen::Menu;
            }
        }
    }
}
