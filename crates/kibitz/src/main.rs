//! Terminal chess against a local Stockfish.
//!
//! Reads commands from stdin, redraws the board when it changes and keeps
//! the engine running on a frame timer.

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use kibitz::config::SessionConfig;
use kibitz::events::{Flow, Session};
use kibitz::{view, EngineHandle, MoveCoordinator};

const FRAME: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they do not interleave with the board
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = SessionConfig::load().context("invalid configuration")?;
    info!(
        stockfish_path = %config.stockfish_path.display(),
        skill = config.skill_level,
        "Config loaded"
    );

    let engine = match EngineHandle::start(&config.stockfish_path, config.handshake_timeout).await
    {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Cannot start Stockfish");
            anyhow::bail!(
                "{e}\nInstall Stockfish and set STOCKFISH_PATH to the executable (default engines/stockfish)"
            );
        }
    };

    let mut session = Session::new(MoveCoordinator::new(
        engine.clone(),
        config.coordinator_settings(),
    ));
    let result = run(&mut session).await;

    info!("Shutting down engine");
    engine.shutdown().await;
    result
}

async fn run(session: &mut Session) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut frame = tokio::time::interval(FRAME);
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut shown = view::render(session);
    println!("{shown}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match view::parse_command(&line, session.screen()) {
                    Ok(events) => {
                        for event in events {
                            if session.handle(event) == Flow::Quit {
                                return Ok(());
                            }
                        }
                    }
                    Err(help) => println!("{help}"),
                }
            }
            _ = frame.tick() => {
                session.tick();
            }
        }

        let frame_text = view::render(session);
        if frame_text != shown {
            println!("{frame_text}");
            shown = frame_text;
        }
    }
    Ok(())
}
