/// Engine process tests against the scripted UCI engine.
///
/// Covers the handshake, option configuration, time-bounded searches,
/// single-request exclusivity and how protocol failures poison the handle.
mod common;

use std::path::Path;
use std::time::Duration;

use chess_core::Game;
use common::{elapsed, spawn_engine, spawn_raw_engine, Script};
use kibitz::stockfish::STOP_GRACE;
use kibitz::{EngineError, EngineHandle, EvaluationScore, SearchRequest};
use shakmaty::Position;

/// Scheduling slack allowed on top of a search limit
const EPSILON: Duration = Duration::from_millis(150);

#[tokio::test]
async fn test_missing_executable_is_unavailable() {
    let result = EngineHandle::start(Path::new("/nonexistent/stockfish"), Duration::from_secs(1)).await;
    assert!(matches!(result, Err(EngineError::Unavailable(_))));
}

#[tokio::test]
async fn test_handshake_records_engine_and_options() {
    let (engine, log) = spawn_raw_engine(Script::default()).await;
    assert_eq!(engine.name(), Some("Fakefish"));
    assert!(engine.supports("Skill Level"));
    assert!(engine.supports("hash"));
    assert!(!engine.supports("Contempt"));
    assert_eq!(log.commands(), ["uci", "isready"]);
}

#[tokio::test]
async fn test_configure_skill_level() {
    let (engine, log) = spawn_engine(Script::default()).await;
    engine.configure(5).await.unwrap();
    assert_eq!(log.count("setoption name Skill Level value 5"), 1);

    let err = engine.configure(21).await.unwrap_err();
    assert!(matches!(err, EngineError::OptionRejected { .. }));
    assert_eq!(engine.try_acquire().unwrap().skill_level(), Some(5));
}

#[tokio::test]
async fn test_unsupported_option_is_rejected_without_poisoning() {
    let script = Script {
        advertise_skill: false,
        ..Script::default()
    };
    let (engine, log) = spawn_engine(script).await;

    let err = engine.configure(3).await.unwrap_err();
    assert!(matches!(err, EngineError::OptionRejected { .. }));
    assert_eq!(log.count("setoption"), 0);
    assert!(!engine.is_broken());

    let game = Game::new();
    engine
        .analyze(&SearchRequest::from_game(&game), Duration::from_millis(50))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_analyze_reports_score_from_white_perspective() {
    let (engine, _log) = spawn_engine(Script {
        score_cp: 40,
        ..Script::default()
    })
    .await;

    let mut game = Game::new();
    let score = engine
        .analyze(&SearchRequest::from_game(&game), Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(score, EvaluationScore::Centipawns(40));

    game.play_uci("e2e4").unwrap();
    let score = engine
        .analyze(&SearchRequest::from_game(&game), Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(score, EvaluationScore::Centipawns(-40));
}

#[tokio::test]
async fn test_play_returns_legal_move() {
    let (engine, log) = spawn_engine(Script::default()).await;
    let mut game = Game::new();
    game.play_uci("e2e4").unwrap();

    let request = SearchRequest::from_game(&game);
    let m = engine.play(&request, Duration::from_millis(100)).await.unwrap();
    assert!(game.position().legal_moves().contains(&m));
    assert_eq!(log.count("position startpos moves e2e4"), 1);
    assert_eq!(log.count("go movetime 100"), 1);
}

#[tokio::test]
async fn test_search_stops_at_time_limit() {
    let (engine, log) = spawn_engine(Script {
        think: Duration::from_secs(30),
        ..Script::default()
    })
    .await;
    let game = Game::new();
    let limit = Duration::from_millis(150);

    let (result, took) = elapsed(engine.play(&SearchRequest::from_game(&game), limit)).await;
    assert!(result.is_ok());
    assert!(took <= limit + STOP_GRACE + EPSILON, "took {took:?}");
    assert_eq!(log.count("stop"), 1);
    assert!(!engine.is_broken());
}

#[tokio::test]
async fn test_analysis_keeps_score_when_engine_ignores_stop() {
    let (engine, _log) = spawn_engine(Script {
        think: Duration::from_millis(600),
        honor_stop: false,
        score_cp: -75,
        ..Script::default()
    })
    .await;
    let game = Game::new();
    let limit = Duration::from_millis(100);
    let request = SearchRequest::from_game(&game);

    let (score, took) = elapsed(engine.analyze(&request, limit)).await;
    assert_eq!(score.unwrap(), EvaluationScore::Centipawns(-75));
    assert!(took <= limit + STOP_GRACE + EPSILON, "took {took:?}");

    // The late bestmove is drained before the next search
    let m = engine.play(&request, Duration::from_secs(2)).await.unwrap();
    assert!(game.position().legal_moves().contains(&m));
}

#[tokio::test]
async fn test_move_request_fails_when_engine_ignores_stop() {
    let (engine, _log) = spawn_engine(Script {
        think: Duration::from_millis(400),
        honor_stop: false,
        ..Script::default()
    })
    .await;
    let game = Game::new();
    let limit = Duration::from_millis(100);
    let request = SearchRequest::from_game(&game);

    let (result, took) = elapsed(engine.play(&request, limit)).await;
    assert!(matches!(result, Err(EngineError::NoMove(_))), "got {result:?}");
    assert!(took <= limit + STOP_GRACE + EPSILON, "took {took:?}");
    assert!(!engine.is_broken());

    // The late bestmove is drained and the engine stays usable
    let m = engine.play(&request, Duration::from_secs(2)).await.unwrap();
    assert!(game.position().legal_moves().contains(&m));
}

#[tokio::test]
async fn test_second_request_while_busy_is_rejected() {
    let (engine, _log) = spawn_engine(Script {
        think: Duration::from_millis(200),
        ..Script::default()
    })
    .await;
    let game = Game::new();
    let request = SearchRequest::from_game(&game);

    let first = {
        let engine = engine.clone();
        let request = request.clone();
        tokio::spawn(async move { engine.play(&request, Duration::from_secs(1)).await })
    };
    while !engine.is_busy() {
        tokio::task::yield_now().await;
    }

    let second = engine.play(&request, Duration::from_secs(1)).await;
    assert_eq!(second.unwrap_err(), EngineError::Busy);
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_promotion_without_piece_is_rejected() {
    let (engine, _log) = spawn_engine(Script::with_moves(&[(0, "a7a8")])).await;
    let game = Game::from_fen("7k/P7/8/8/8/8/8/4K3 w - - 0 1").unwrap();
    let request = SearchRequest::from_game(&game);

    let err = engine.play(&request, Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalMove(_)));
    assert!(!engine.is_broken());

    engine.analyze(&request, Duration::from_millis(100)).await.unwrap();
}

#[tokio::test]
async fn test_closed_pipe_poisons_handle() {
    let (engine, _log) = spawn_engine(Script {
        die_after_handshake: true,
        ..Script::default()
    })
    .await;
    let game = Game::new();
    let request = SearchRequest::from_game(&game);

    let err = engine.play(&request, Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, EngineError::Io(_)), "got {err:?}");
    assert!(engine.is_broken());

    let err = engine.analyze(&request, Duration::from_millis(100)).await.unwrap_err();
    assert_eq!(err, EngineError::Broken);
}

#[tokio::test]
async fn test_shutdown_sends_quit() {
    let (engine, log) = spawn_engine(Script::default()).await;
    engine.shutdown().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(log.count("quit"), 1);
}
