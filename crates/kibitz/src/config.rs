//! Session configuration from environment variables

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shakmaty::Color;

use crate::coordinator::CoordinatorSettings;
use crate::error::SessionError;
use crate::stockfish::MAX_SKILL_LEVEL;

/// Menu presets offered when starting a game
pub const DIFFICULTY_PRESETS: [u8; 5] = [0, 5, 10, 15, 20];

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Path to Stockfish binary
    pub stockfish_path: PathBuf,

    /// Engine skill level (0..=20)
    pub skill_level: u8,

    /// Side the human plays
    pub human_color: Color,

    /// Minimum time between an applied move and the engine's next move
    pub move_delay: Duration,

    /// Search limit for the evaluation shown before each engine move
    pub analyze_time: Duration,

    /// Search limit for the engine's own move
    pub play_time: Duration,

    /// Search limit for a move suggestion
    pub suggest_time: Duration,

    /// Time allowed for the UCI handshake
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stockfish_path: PathBuf::from("engines/stockfish"),
            skill_level: 10,
            human_color: Color::White,
            move_delay: Duration::from_millis(1000),
            analyze_time: Duration::from_millis(100),
            play_time: Duration::from_millis(1000),
            suggest_time: Duration::from_millis(2000),
            handshake_timeout: Duration::from_millis(10_000),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables. Unset variables take
    /// their defaults; malformed ones are an error.
    pub fn load() -> Result<Self, SessionError> {
        let defaults = Self::default();

        let stockfish_path = env::var("STOCKFISH_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.stockfish_path);

        let skill_level = parse_var("SKILL_LEVEL", defaults.skill_level)?;
        if skill_level > MAX_SKILL_LEVEL {
            return Err(SessionError::Config(format!(
                "SKILL_LEVEL must be within 0..={MAX_SKILL_LEVEL}, got {skill_level}"
            )));
        }

        let human_color = match env::var("PLAYER_COLOR") {
            Ok(value) => parse_color(&value).ok_or_else(|| {
                SessionError::Config(format!("PLAYER_COLOR must be white or black, got {value}"))
            })?,
            Err(_) => defaults.human_color,
        };

        Ok(Self {
            stockfish_path,
            skill_level,
            human_color,
            move_delay: parse_millis("MOVE_DELAY_MS", defaults.move_delay)?,
            analyze_time: parse_millis("ANALYZE_TIME_MS", defaults.analyze_time)?,
            play_time: parse_millis("PLAY_TIME_MS", defaults.play_time)?,
            suggest_time: parse_millis("SUGGEST_TIME_MS", defaults.suggest_time)?,
            handshake_timeout: parse_millis("HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout)?,
        })
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            human: self.human_color,
            skill_level: self.skill_level,
            move_delay: self.move_delay,
            analyze_time: self.analyze_time,
            play_time: self.play_time,
            suggest_time: self.suggest_time,
        }
    }
}

pub fn parse_color(value: &str) -> Option<Color> {
    match value.trim().to_ascii_lowercase().as_str() {
        "white" | "w" => Some(Color::White),
        "black" | "b" => Some(Color::Black),
        _ => None,
    }
}

/// Display name for a skill level
pub fn difficulty_name(level: u8) -> &'static str {
    match level {
        0..=2 => "Very easy",
        3..=7 => "Easy",
        8..=12 => "Medium",
        13..=17 => "Hard",
        _ => "Very hard",
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, SessionError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| SessionError::Config(format!("{name} is malformed: {value}"))),
        Err(_) => Ok(default),
    }
}

fn parse_millis(name: &str, default: Duration) -> Result<Duration, SessionError> {
    let millis = parse_var(name, default.as_millis() as u64)?;
    if millis == 0 {
        return Err(SessionError::Config(format!("{name} must be positive")));
    }
    Ok(Duration::from_millis(millis))
}
