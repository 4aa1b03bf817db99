//! PGN load/save for game records.
//!
//! Loading reads the first game's tags and mainline SAN moves; the moves are
//! replayed from the starting setup so an illegal record never reaches the
//! caller. Saving writes the seven-tag roster and a numbered move list.

use std::fs;
use std::ops::ControlFlow;
use std::path::Path;

use pgn_reader::{RawTag, Reader, SanPlus, Visitor};
use thiserror::Error;

use crate::game_data::{GameMetadata, GameRecord};
use crate::rules::{Game, GameOutcome};

const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Movetext lines are wrapped before this width
const LINE_WIDTH: usize = 80;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No game found in record")]
    Empty,

    #[error("Illegal move {san} at ply {ply}")]
    IllegalMove { ply: usize, san: String },

    #[error("Invalid starting position: {0}")]
    InvalidSetup(String),
}

#[derive(Default)]
struct RecordTags {
    metadata: GameMetadata,
    setup: bool,
    fen: Option<String>,
}

#[derive(Default)]
struct RecordBuilder {
    record: Option<GameRecord>,
}

impl Visitor for RecordBuilder {
    type Tags = RecordTags;
    type Movetext = GameRecord;
    type Output = ();

    fn begin_tags(&mut self) -> ControlFlow<(), RecordTags> {
        ControlFlow::Continue(RecordTags::default())
    }

    fn tag(&mut self, tags: &mut RecordTags, name: &[u8], value: RawTag<'_>) -> ControlFlow<()> {
        let value = value.decode_utf8_lossy().to_string();
        match name {
            b"Event" => tags.metadata.event = value,
            b"Site" => tags.metadata.site = value,
            b"Date" => tags.metadata.date = Some(value),
            b"Round" => tags.metadata.round = value,
            b"White" => tags.metadata.white = value,
            b"Black" => tags.metadata.black = value,
            b"Result" => tags.metadata.result = value,
            b"SetUp" => tags.setup = value == "1",
            b"FEN" => tags.fen = Some(value),
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: RecordTags) -> ControlFlow<(), GameRecord> {
        // A FEN tag equal to the standard setup is the same as no FEN at all
        let start_fen = tags
            .fen
            .filter(|fen| tags.setup && fen.trim() != STANDARD_START_FEN);

        ControlFlow::Continue(GameRecord {
            metadata: tags.metadata,
            start_fen,
            moves: Vec::new(),
        })
    }

    fn san(&mut self, record: &mut GameRecord, san_plus: SanPlus) -> ControlFlow<()> {
        record.moves.push(san_plus.to_string());
        ControlFlow::Continue(())
    }

    fn end_game(&mut self, record: GameRecord) {
        self.record = Some(record);
    }
}

/// Parse the first game of a PGN document.
pub fn parse_pgn(pgn: &str) -> Result<GameRecord, RecordError> {
    let mut builder = RecordBuilder::default();
    let mut reader = Reader::new(pgn.as_bytes());
    reader.read_game(&mut builder)?;
    builder.record.ok_or(RecordError::Empty)
}

/// Rebuild the game by replaying the record's moves from its starting setup.
pub fn replay(record: &GameRecord) -> Result<Game, RecordError> {
    let mut game = match &record.start_fen {
        Some(fen) => Game::from_fen(fen).map_err(|e| RecordError::InvalidSetup(e.to_string()))?,
        None => Game::new(),
    };

    for (ply, san) in record.moves.iter().enumerate() {
        game.play_san(san).map_err(|_| RecordError::IllegalMove {
            ply: ply + 1,
            san: san.clone(),
        })?;
    }

    if record.metadata.result == "1/2-1/2" && game.outcome() == GameOutcome::Ongoing {
        game.declare_draw();
    }

    Ok(game)
}

/// Serialize a record as PGN text.
pub fn write_pgn(record: &GameRecord) -> Result<String, RecordError> {
    let game = replay(record)?;
    let meta = &record.metadata;

    let mut out = String::new();
    push_tag(&mut out, "Event", &meta.event);
    push_tag(&mut out, "Site", &meta.site);
    push_tag(&mut out, "Date", meta.date.as_deref().unwrap_or("????.??.??"));
    push_tag(&mut out, "Round", &meta.round);
    push_tag(&mut out, "White", &meta.white);
    push_tag(&mut out, "Black", &meta.black);
    push_tag(&mut out, "Result", &meta.result);
    if let Some(fen) = &record.start_fen {
        push_tag(&mut out, "SetUp", "1");
        push_tag(&mut out, "FEN", fen);
    }
    out.push('\n');

    let mut tokens: Vec<String> = Vec::new();
    for entry in game.numbered_history() {
        tokens.extend(entry.split(' ').map(str::to_string));
    }
    tokens.push(meta.result.clone());

    let mut line_len = 0;
    for token in tokens {
        if line_len > 0 && line_len + 1 + token.len() > LINE_WIDTH {
            out.push('\n');
            line_len = 0;
        } else if line_len > 0 {
            out.push(' ');
            line_len += 1;
        }
        line_len += token.len();
        out.push_str(&token);
    }
    out.push('\n');

    Ok(out)
}

fn push_tag(out: &mut String, name: &str, value: &str) {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    out.push_str(&format!("[{name} \"{escaped}\"]\n"));
}

/// Read and replay the first game of a PGN file.
pub fn load_file(path: &Path) -> Result<(GameRecord, Game), RecordError> {
    let text = fs::read_to_string(path)?;
    let record = parse_pgn(&text)?;
    let game = replay(&record)?;
    Ok((record, game))
}

pub fn save_file(path: &Path, record: &GameRecord) -> Result<(), RecordError> {
    let text = write_pgn(record)?;
    fs::write(path, text)?;
    Ok(())
}
