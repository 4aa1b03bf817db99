//! Plain-text front end: command parsing and board rendering.

use std::fmt::Write as _;
use std::path::PathBuf;

use shakmaty::{CastlingMode, Color, File, Position, Rank, Role, Square};

use crate::config::{difficulty_name, parse_color, DIFFICULTY_PRESETS};
use crate::coordinator::{CoordinatorState, MoveCoordinator, ThinkingKind};
use crate::events::{GameEvent, MenuEvent, PromotionEvent, Screen, Session, SessionEvent};

/// Number of history entries shown under the board
const HISTORY_LINES: usize = 8;

/// Width of the evaluation bar in characters
const BAR_WIDTH: usize = 20;

pub const MENU_HELP: &str = "\
Commands: new [white|black] [0-20]   load <file.pgn>   quit";

pub const GAME_HELP: &str = "\
Commands: <square> (e.g. e2) or <from><to> (e.g. e2e4), q/r/b/n to promote,
cancel, suggest, analysis, hints, save <file.pgn>, restart, menu, quit";

/// Translate one line of input into session events.
pub fn parse_command(line: &str, screen: Screen) -> Result<Vec<SessionEvent>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Vec::new());
    };
    let command = command.to_ascii_lowercase();
    let rest: Vec<&str> = words.collect();

    if command == "quit" || command == "exit" {
        return Ok(vec![SessionEvent::Menu(MenuEvent::Quit)]);
    }

    match screen {
        Screen::Menu => parse_menu(&command, &rest),
        Screen::Game => parse_game(&command, &rest),
    }
}

fn parse_menu(command: &str, rest: &[&str]) -> Result<Vec<SessionEvent>, String> {
    match command {
        "new" | "start" => {
            let mut human = Color::White;
            let mut skill_level = DIFFICULTY_PRESETS[2];
            for arg in rest {
                if let Some(color) = parse_color(arg) {
                    human = color;
                } else {
                    skill_level = arg
                        .parse()
                        .ok()
                        .filter(|level| *level <= 20)
                        .ok_or_else(|| format!("Unknown option {arg}\n{MENU_HELP}"))?;
                }
            }
            Ok(vec![SessionEvent::Menu(MenuEvent::StartGame {
                human,
                skill_level,
            })])
        }
        "load" => path_arg(rest).map(|p| vec![SessionEvent::Menu(MenuEvent::LoadGame(p))]),
        _ => Err(MENU_HELP.to_string()),
    }
}

fn parse_game(command: &str, rest: &[&str]) -> Result<Vec<SessionEvent>, String> {
    let game = |event: GameEvent| -> Result<Vec<SessionEvent>, String> {
        Ok(vec![SessionEvent::Game(event)])
    };
    let promote = |role: Role| -> Result<Vec<SessionEvent>, String> {
        Ok(vec![SessionEvent::Promotion(PromotionEvent::Promote(role))])
    };

    match command {
        "q" | "queen" => promote(Role::Queen),
        "r" | "rook" => promote(Role::Rook),
        "b" | "bishop" => promote(Role::Bishop),
        "n" | "knight" => promote(Role::Knight),
        "cancel" => Ok(vec![SessionEvent::Promotion(PromotionEvent::Cancel)]),
        "suggest" | "hint" => game(GameEvent::Suggest),
        "analysis" => game(GameEvent::ToggleAnalysis),
        "hints" => game(GameEvent::ToggleHints),
        "restart" => game(GameEvent::Restart),
        "menu" => game(GameEvent::MainMenu),
        "save" => path_arg(rest).map(|p| vec![SessionEvent::Game(GameEvent::Save(p))]),
        _ => parse_squares(command).ok_or_else(|| GAME_HELP.to_string()),
    }
}

/// "e2" is one click, "e2e4" is two.
fn parse_squares(text: &str) -> Option<Vec<SessionEvent>> {
    let click = |s: &str| -> Option<SessionEvent> {
        let square: Square = s.parse().ok()?;
        Some(SessionEvent::Game(GameEvent::Click(square)))
    };
    if !text.is_ascii() {
        return None;
    }
    match text.len() {
        2 => Some(vec![click(text)?]),
        4 => Some(vec![click(&text[..2])?, click(&text[2..])?]),
        _ => None,
    }
}

fn path_arg(rest: &[&str]) -> Result<PathBuf, String> {
    if rest.is_empty() {
        Err("A file path is required".to_string())
    } else {
        Ok(PathBuf::from(rest.join(" ")))
    }
}

pub fn render(session: &Session) -> String {
    match session.screen() {
        Screen::Menu => render_menu(session.coordinator()),
        Screen::Game => render_game(session.coordinator()),
    }
}

fn render_menu(coordinator: &MoveCoordinator) -> String {
    let mut out = String::from("=== kibitz ===\nDifficulty presets:\n");
    for level in DIFFICULTY_PRESETS {
        let _ = writeln!(out, "  {level:>2}  {}", difficulty_name(level));
    }
    if let Some(message) = coordinator.message() {
        let _ = writeln!(out, "{message}");
    }
    out.push_str(MENU_HELP);
    out.push('\n');
    out
}

fn render_game(coordinator: &MoveCoordinator) -> String {
    let game = coordinator.game();
    let board = game.position().board();
    let human = coordinator.human_color();
    let targets: &[Square] = match coordinator.selection() {
        Some(selection) if coordinator.show_hints() => &selection.targets,
        _ => &[],
    };
    let selected = coordinator.selection().map(|s| s.square);

    let ranks: Vec<Rank> = match human {
        Color::White => Rank::ALL.iter().rev().copied().collect(),
        Color::Black => Rank::ALL.to_vec(),
    };
    let files: Vec<File> = match human {
        Color::White => File::ALL.to_vec(),
        Color::Black => File::ALL.iter().rev().copied().collect(),
    };

    let mut out = String::new();
    for rank in &ranks {
        let _ = write!(out, "{} ", rank.char());
        for file in &files {
            let square = Square::from_coords(*file, *rank);
            let glyph = match board.piece_at(square) {
                Some(piece) => piece.char(),
                None if targets.contains(&square) => '*',
                None => '.',
            };
            let (open, close) = if selected == Some(square) {
                ('[', ']')
            } else {
                (' ', ' ')
            };
            let _ = write!(out, "{open}{glyph}{close}");
        }
        out.push('\n');
    }
    out.push_str("  ");
    for file in &files {
        let _ = write!(out, " {} ", file.char());
    }
    out.push('\n');

    let settings = coordinator.settings();
    let _ = writeln!(
        out,
        "Stockfish: {} ({}){}",
        difficulty_name(settings.skill_level),
        settings.skill_level,
        if coordinator.analysis_mode() {
            "  [analysis]"
        } else {
            ""
        }
    );

    if let Some(score) = coordinator.evaluation() {
        let filled = (score.bar_fraction() * BAR_WIDTH as f32).round() as usize;
        let _ = writeln!(
            out,
            "Eval {score:>6} [{}{}]",
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled.min(BAR_WIDTH))
        );
    }

    let history = game.numbered_history();
    let start = history.len().saturating_sub(HISTORY_LINES);
    for entry in &history[start..] {
        let _ = writeln!(out, "  {entry}");
    }

    if let Some(m) = coordinator.suggestion() {
        let _ = writeln!(out, "Suggestion: {}", m.to_uci(CastlingMode::Standard));
    }

    let status = match coordinator.state() {
        CoordinatorState::GameOver => game.outcome().describe(),
        CoordinatorState::AwaitingPromotionChoice => {
            "Promote to: q(ueen) r(ook) b(ishop) n(knight), or cancel".to_string()
        }
        CoordinatorState::EngineThinking => "Stockfish is thinking...".to_string(),
        CoordinatorState::HumanSelecting | CoordinatorState::WaitingForHuman => {
            let side = if game.turn() == Color::White {
                "White"
            } else {
                "Black"
            };
            format!("{side} to move")
        }
    };
    let _ = writeln!(out, "{status}");

    if let Some(message) = coordinator.message() {
        if coordinator.state() != CoordinatorState::GameOver {
            let _ = writeln!(out, "{message}");
        }
    }
    if coordinator.thinking().kind == ThinkingKind::Suggesting {
        out.push_str("Looking for a suggestion...\n");
    }
    out
}
