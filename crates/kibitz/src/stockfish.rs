//! UCI engine process wrapper (async I/O)

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chess_core::rules::last_rank;
use chess_core::Game;
use shakmaty::{uci::UciMove, Chess, Color, Move, Position, Role};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Centipawn value standing in for a forced mate
pub const MATE_SCORE: i32 = 10_000;

pub const SKILL_LEVEL_OPTION: &str = "Skill Level";
pub const MAX_SKILL_LEVEL: u8 = 20;

/// Time the engine gets to answer `stop` once a search limit has passed
pub const STOP_GRACE: Duration = Duration::from_millis(100);

const QUIT_TIMEOUT: Duration = Duration::from_secs(1);

type EngineReader = Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>;
type EngineWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Position evaluation from White's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationScore {
    Centipawns(i32),
    /// Mate in N moves (positive = White mates, negative = Black mates)
    Mate(i32),
}

impl EvaluationScore {
    /// Convert an engine score, which is relative to the side to move.
    pub fn from_side_to_move(score: EvaluationScore, turn: Color) -> Self {
        match (turn, score) {
            (Color::White, s) => s,
            (Color::Black, EvaluationScore::Centipawns(cp)) => EvaluationScore::Centipawns(-cp),
            (Color::Black, EvaluationScore::Mate(n)) => EvaluationScore::Mate(-n),
        }
    }

    /// Score in centipawns, mates mapped next to `MATE_SCORE`.
    pub fn centipawns(self) -> i32 {
        match self {
            EvaluationScore::Centipawns(cp) => cp,
            EvaluationScore::Mate(n) if n > 0 => MATE_SCORE - n,
            EvaluationScore::Mate(n) => -MATE_SCORE - n,
        }
    }

    pub fn pawns(self) -> f32 {
        self.centipawns() as f32 / 100.0
    }

    /// White's share of an evaluation bar spanning -5..+5 pawns.
    pub fn bar_fraction(self) -> f32 {
        ((self.pawns() + 5.0) / 10.0).clamp(0.0, 1.0)
    }
}

impl fmt::Display for EvaluationScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationScore::Centipawns(_) => write!(f, "{:+.1}", self.pawns()),
            EvaluationScore::Mate(n) => write!(f, "#{n}"),
        }
    }
}

/// Owned snapshot of a game handed to the engine, so a search never
/// touches the coordinator's position.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub position: Chess,
    pub command: String,
}

impl SearchRequest {
    pub fn from_game(game: &Game) -> Self {
        Self {
            position: game.position().clone(),
            command: game.uci_position_command(),
        }
    }
}

#[derive(Debug, Default)]
struct SearchReport {
    score: Option<EvaluationScore>,
    best_move: Option<String>,
}

/// UCI engine instance
pub struct StockfishEngine {
    process: Option<Child>,
    stdin: EngineWriter,
    stdout: EngineReader,
    name: Option<String>,
    options: HashSet<String>,
    skill_level: Option<u8>,
    /// A search ended without its `bestmove`; resync before the next one
    desynced: bool,
}

impl StockfishEngine {
    /// Spawn the engine process and complete the UCI handshake.
    pub async fn start(path: &Path, handshake_timeout: Duration) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::Unavailable(format!(
                "executable not found at {}",
                path.display()
            )));
        }

        let mut process = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("failed to spawn {}: {e}", path.display())))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdin not captured".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdout not captured".into()))?;

        // On failure the child is dropped here and killed with it
        let mut engine = Self::connect(stdout, stdin, handshake_timeout).await?;
        engine.process = Some(process);
        info!(path = %path.display(), name = ?engine.name, "Engine started");
        Ok(engine)
    }

    /// Run the handshake over an already connected pair of streams.
    pub async fn connect<R, W>(
        reader: R,
        writer: W,
        handshake_timeout: Duration,
    ) -> Result<Self, EngineError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let reader: Box<dyn AsyncRead + Unpin + Send> = Box::new(reader);
        let mut engine = Self {
            process: None,
            stdin: Box::new(writer),
            stdout: BufReader::new(reader).lines(),
            name: None,
            options: HashSet::new(),
            skill_level: None,
            desynced: false,
        };

        match timeout(handshake_timeout, engine.handshake()).await {
            Ok(Ok(())) => Ok(engine),
            Ok(Err(e)) => Err(EngineError::Unavailable(format!("handshake failed: {e}"))),
            Err(_) => Err(EngineError::Unavailable(format!(
                "no handshake within {handshake_timeout:?}"
            ))),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn skill_level(&self) -> Option<u8> {
        self.skill_level
    }

    /// Whether the engine advertised `name` during the handshake
    pub fn supports(&self, name: &str) -> bool {
        self.options.contains(&name.to_ascii_lowercase())
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci").await?;
        loop {
            let line = self.read_line().await?;
            if let Some(name) = line.strip_prefix("id name ") {
                self.name = Some(name.to_string());
            } else if let Some(option) = line.strip_prefix("option name ") {
                let name = option.split(" type ").next().unwrap_or(option);
                self.options.insert(name.trim().to_ascii_lowercase());
            } else if line == "uciok" {
                break;
            }
        }
        self.sync().await?;
        Ok(())
    }

    /// Send a command to the engine
    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "UCI <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Io(format!("failed to write to engine: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EngineError::Io(format!("failed to flush engine stdin: {e}")))?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, EngineError> {
        let line = self
            .stdout
            .next_line()
            .await
            .map_err(|e| EngineError::Io(format!("failed to read from engine: {e}")))?
            .ok_or_else(|| EngineError::Io("engine closed its output".into()))?;
        let trimmed = line.trim().to_string();
        debug!(line = %trimmed, "UCI >");
        Ok(trimmed)
    }

    /// `isready` round trip; returns the lines printed before `readyok`.
    async fn sync(&mut self) -> Result<Vec<String>, EngineError> {
        self.send("isready").await?;
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "readyok" {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    /// Set an option the engine advertised. A rejected option leaves the
    /// previous value in effect.
    pub async fn set_option(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        if !self.supports(name) {
            return Err(EngineError::OptionRejected {
                name: name.to_string(),
                reason: "option not advertised by engine".into(),
            });
        }

        self.send(&format!("setoption name {name} value {value}")).await?;
        let replies = self.sync().await?;
        if let Some(reply) = replies
            .iter()
            .find(|l| l.starts_with("No such option") || l.contains("rror"))
        {
            return Err(EngineError::OptionRejected {
                name: name.to_string(),
                reason: reply.clone(),
            });
        }
        Ok(())
    }

    pub async fn configure_skill(&mut self, level: u8) -> Result<(), EngineError> {
        if level > MAX_SKILL_LEVEL {
            return Err(EngineError::OptionRejected {
                name: SKILL_LEVEL_OPTION.to_string(),
                reason: format!("{level} is outside 0..={MAX_SKILL_LEVEL}"),
            });
        }
        self.set_option(SKILL_LEVEL_OPTION, &level.to_string()).await?;
        self.skill_level = Some(level);
        info!(skill = level, "Engine skill level configured");
        Ok(())
    }

    /// Evaluate a position within `limit`. When the limit passes, the last
    /// score the engine reported is returned.
    pub async fn analyze(
        &mut self,
        request: &SearchRequest,
        limit: Duration,
    ) -> Result<EvaluationScore, EngineError> {
        let report = self.search(request, limit).await?;
        report.score.ok_or(EngineError::NoEvaluation)
    }

    /// Ask for the engine's move within `limit`, validated against the position.
    pub async fn best_move(
        &mut self,
        request: &SearchRequest,
        limit: Duration,
    ) -> Result<Move, EngineError> {
        let report = self.search(request, limit).await?;
        if self.desynced {
            // The next search resyncs before it starts
            return Err(EngineError::NoMove(limit));
        }
        let token = report
            .best_move
            .ok_or_else(|| EngineError::Protocol("search ended without bestmove".into()))?;
        parse_engine_move(&request.position, &token)
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
        limit: Duration,
    ) -> Result<SearchReport, EngineError> {
        let deadline = Instant::now() + limit;
        let turn = request.position.turn();

        if self.desynced {
            // Drains the stale bestmove of the previous search
            match timeout_at(deadline, self.sync()).await {
                Ok(result) => {
                    result?;
                    self.desynced = false;
                }
                Err(_) => return Err(EngineError::Unresponsive(limit)),
            }
        }

        self.send(&request.command).await?;
        self.send(&format!("go movetime {}", limit.as_millis().max(1)))
            .await?;

        let mut report = SearchReport::default();
        while let Ok(line) = timeout_at(deadline, self.read_line()).await {
            if absorb(&line?, turn, &mut report) {
                return Ok(report);
            }
        }

        debug!(?limit, "Search limit reached, sending stop");
        self.send("stop").await?;
        let grace = Instant::now() + STOP_GRACE;
        while let Ok(line) = timeout_at(grace, self.read_line()).await {
            if absorb(&line?, turn, &mut report) {
                return Ok(report);
            }
        }

        warn!(?limit, "Engine ignored stop, keeping best result so far");
        self.desynced = true;
        Ok(report)
    }

    /// Send quit command and wait for process to exit
    pub async fn quit(&mut self) {
        let _ = self.send("quit").await;
        if let Some(process) = self.process.as_mut() {
            match timeout(QUIT_TIMEOUT, process.wait()).await {
                Ok(status) => info!(?status, "Engine exited"),
                Err(_) => {
                    warn!("Engine did not exit after quit, killing it");
                    let _ = process.kill().await;
                }
            }
        }
    }
}

impl Drop for StockfishEngine {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        if let Some(process) = self.process.as_mut() {
            let _ = process.start_kill();
        }
    }
}

/// Fold one engine output line into the report; true once `bestmove` arrives.
fn absorb(line: &str, turn: Color, report: &mut SearchReport) -> bool {
    if line.starts_with("info") && line.contains(" score ") {
        if let Some(cp) = parse_cp(line) {
            report.score = Some(EvaluationScore::from_side_to_move(
                EvaluationScore::Centipawns(cp),
                turn,
            ));
        } else if let Some(mate) = parse_mate(line) {
            report.score = Some(EvaluationScore::from_side_to_move(
                EvaluationScore::Mate(mate),
                turn,
            ));
        }
        false
    } else if line.starts_with("bestmove") {
        report.best_move = line.split_whitespace().nth(1).map(str::to_string);
        true
    } else {
        false
    }
}

/// Turn a `bestmove` token into a legal move. A pawn reaching the last rank
/// must carry its promotion piece; no default is assumed.
pub fn parse_engine_move(position: &Chess, token: &str) -> Result<Move, EngineError> {
    if token == "(none)" || token == "0000" {
        return Err(EngineError::IllegalMove(format!(
            "engine has no move ({token})"
        )));
    }

    let uci: UciMove = token
        .parse()
        .map_err(|_| EngineError::Protocol(format!("malformed bestmove {token}")))?;

    if let UciMove::Normal {
        from,
        to,
        promotion: None,
    } = uci
    {
        let pawn = position
            .board()
            .piece_at(from)
            .filter(|p| p.role == Role::Pawn);
        if let Some(pawn) = pawn {
            if to.rank() == last_rank(pawn.color) {
                return Err(EngineError::IllegalMove(format!(
                    "{token} reaches the last rank without a promotion piece"
                )));
            }
        }
    }

    uci.to_move(position)
        .map_err(|_| EngineError::IllegalMove(token.to_string()))
}

/// Parse centipawn score from info line
fn parse_cp(line: &str) -> Option<i32> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == "cp" && i + 1 < parts.len() {
            return parts[i + 1].parse().ok();
        }
    }
    None
}

/// Parse mate score from info line
fn parse_mate(line: &str) -> Option<i32> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == "mate" && i + 1 < parts.len() {
            return parts[i + 1].parse().ok();
        }
    }
    None
}
