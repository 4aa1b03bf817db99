//! Scripted UCI engine for tests, talking over an in-memory pipe.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chess_core::Game;
use kibitz::{EngineHandle, MoveCoordinator, StockfishEngine, Tick};
use shakmaty::{CastlingMode, Position};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// How the fake engine behaves.
#[derive(Clone, Debug)]
pub struct Script {
    /// Score reported for every search, relative to the side to move
    pub score_cp: i32,
    /// Time spent on each search before `bestmove`
    pub think: Duration,
    /// Answer `stop` right away; otherwise keep thinking for the full time
    pub honor_stop: bool,
    /// Bestmove token per ply of the searched position; the first legal
    /// move when none is scripted
    pub moves: HashMap<usize, String>,
    pub advertise_skill: bool,
    /// Close the pipe once the handshake is done
    pub die_after_handshake: bool,
}

impl Script {
    pub fn with_moves(moves: &[(usize, &str)]) -> Self {
        Self {
            moves: moves.iter().map(|(ply, m)| (*ply, m.to_string())).collect(),
            ..Self::default()
        }
    }
}

impl Default for Script {
    fn default() -> Self {
        Self {
            score_cp: 25,
            think: Duration::from_millis(5),
            honor_stop: true,
            moves: HashMap::new(),
            advertise_skill: true,
            die_after_handshake: false,
        }
    }
}

/// Every command the fake engine received
#[derive(Clone, Default)]
pub struct ScriptLog(Arc<Mutex<Vec<String>>>);

impl ScriptLog {
    fn push(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub async fn spawn_engine(script: Script) -> (EngineHandle, ScriptLog) {
    let engine = spawn_raw_engine(script).await;
    (EngineHandle::from_engine(engine.0), engine.1)
}

pub async fn spawn_raw_engine(script: Script) -> (StockfishEngine, ScriptLog) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let log = ScriptLog::default();
    tokio::spawn(run_script(server, script, log.clone()));

    let engine = StockfishEngine::connect(client_read, client_write, Duration::from_secs(5))
        .await
        .expect("fake engine handshake");
    (engine, log)
}

/// Settings with short limits so tests run quickly
pub fn fast_settings() -> kibitz::CoordinatorSettings {
    kibitz::CoordinatorSettings {
        move_delay: Duration::from_millis(10),
        analyze_time: Duration::from_millis(50),
        play_time: Duration::from_millis(100),
        suggest_time: Duration::from_millis(100),
        ..kibitz::CoordinatorSettings::default()
    }
}

pub async fn coordinator(script: Script) -> (MoveCoordinator, ScriptLog) {
    let (engine, log) = spawn_engine(script).await;
    (MoveCoordinator::new(engine, fast_settings()), log)
}

/// Call `advance()` until `done` holds, failing after five seconds.
pub async fn advance_until<F>(coordinator: &mut MoveCoordinator, mut done: F)
where
    F: FnMut(&MoveCoordinator) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done(coordinator) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, state {:?}",
            coordinator.state()
        );
        coordinator.advance();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Call `advance()` until nothing is running and nothing is left to start.
pub async fn settle(coordinator: &mut MoveCoordinator) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while coordinator.advance() != Tick::Idle {
        assert!(tokio::time::Instant::now() < deadline, "coordinator never settled");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Run `advance()` for a while without expecting anything in particular.
pub async fn advance_for(coordinator: &mut MoveCoordinator, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline {
        coordinator.advance();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub async fn elapsed<T>(fut: impl Future<Output = T>) -> (T, Duration) {
    let start = tokio::time::Instant::now();
    let out = fut.await;
    (out, start.elapsed())
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) {
    let _ = writer.write_all(format!("{text}\n").as_bytes()).await;
    let _ = writer.flush().await;
}

fn parse_position(line: &str) -> Game {
    let rest = line.trim_start_matches("position").trim();
    let (setup, moves) = match rest.split_once("moves") {
        Some((setup, moves)) => (setup.trim(), moves.trim()),
        None => (rest, ""),
    };
    let mut game = match setup.strip_prefix("fen") {
        Some(fen) => Game::from_fen(fen.trim()).expect("fake engine fen"),
        None => Game::new(),
    };
    for uci in moves.split_whitespace() {
        game.play_uci(uci).expect("fake engine move");
    }
    game
}

async fn run_script(server: tokio::io::DuplexStream, script: Script, log: ScriptLog) {
    let (read, mut write) = tokio::io::split(server);
    let mut lines = BufReader::new(read).lines();
    let mut game = Game::new();
    let mut handshake_done = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        log.push(&line);
        let command = line.split_whitespace().next().unwrap_or("");

        match command {
            "uci" => {
                reply(&mut write, "id name Fakefish").await;
                if script.advertise_skill {
                    reply(
                        &mut write,
                        "option name Skill Level type spin default 20 min 0 max 20",
                    )
                    .await;
                }
                reply(&mut write, "option name Hash type spin default 16 min 1 max 1024").await;
                reply(&mut write, "uciok").await;
            }
            "isready" => {
                reply(&mut write, "readyok").await;
                if !handshake_done {
                    handshake_done = true;
                    if script.die_after_handshake {
                        return;
                    }
                }
            }
            "setoption" => {
                if line.contains("Skill Level") && !script.advertise_skill {
                    reply(&mut write, "No such option: Skill Level").await;
                }
            }
            "position" => game = parse_position(&line),
            "go" => {
                let best = script.moves.get(&game.ply()).cloned().unwrap_or_else(|| {
                    game.position()
                        .legal_moves()
                        .first()
                        .map(|m| m.to_uci(CastlingMode::Standard).to_string())
                        .unwrap_or_else(|| "(none)".to_string())
                });
                reply(
                    &mut write,
                    &format!("info depth 1 score cp {} pv {best}", script.score_cp),
                )
                .await;

                let think = tokio::time::sleep(script.think);
                tokio::pin!(think);
                let mut ready_requested = false;
                loop {
                    tokio::select! {
                        _ = &mut think => break,
                        next = lines.next_line() => match next {
                            Ok(Some(next)) => {
                                let next = next.trim().to_string();
                                log.push(&next);
                                if next == "stop" && script.honor_stop {
                                    break;
                                }
                                if next == "isready" {
                                    ready_requested = true;
                                }
                                if next == "quit" {
                                    return;
                                }
                            }
                            _ => return,
                        },
                    }
                }
                reply(&mut write, &format!("bestmove {best}")).await;
                if ready_requested {
                    reply(&mut write, "readyok").await;
                }
            }
            "quit" => return,
            _ => {}
        }
    }
}
