//! Shared engine handle with at most one outstanding request.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shakmaty::Move;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::stockfish::{EvaluationScore, SearchRequest, StockfishEngine};

struct EngineSlot {
    engine: StockfishEngine,
    broken: bool,
    path: Option<PathBuf>,
    handshake_timeout: Duration,
}

/// Cloneable handle to one engine process. Requests hold the lock for
/// their whole duration, so a second caller sees `EngineError::Busy`.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Mutex<EngineSlot>>,
}

impl EngineHandle {
    pub async fn start(path: &Path, handshake_timeout: Duration) -> Result<Self, EngineError> {
        let engine = StockfishEngine::start(path, handshake_timeout).await?;
        Ok(Self::wrap(engine, Some(path.to_path_buf()), handshake_timeout))
    }

    /// Wrap an already connected engine. Such a handle cannot respawn.
    pub fn from_engine(engine: StockfishEngine) -> Self {
        Self::wrap(engine, None, Duration::from_secs(10))
    }

    fn wrap(engine: StockfishEngine, path: Option<PathBuf>, handshake_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EngineSlot {
                engine,
                broken: false,
                path,
                handshake_timeout,
            })),
        }
    }

    /// Take exclusive use of the engine without waiting.
    pub fn try_acquire(&self) -> Result<EngineLease, EngineError> {
        let slot = self
            .inner
            .clone()
            .try_lock_owned()
            .map_err(|_| EngineError::Busy)?;
        Ok(EngineLease { slot })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// False while busy, since the flag cannot be read then.
    pub fn is_broken(&self) -> bool {
        self.inner.try_lock().map(|s| s.broken).unwrap_or(false)
    }

    pub async fn configure(&self, level: u8) -> Result<(), EngineError> {
        self.try_acquire()?.configure(level).await
    }

    pub async fn analyze(
        &self,
        request: &SearchRequest,
        limit: Duration,
    ) -> Result<EvaluationScore, EngineError> {
        self.try_acquire()?.analyze(request, limit).await
    }

    pub async fn play(&self, request: &SearchRequest, limit: Duration) -> Result<Move, EngineError> {
        self.try_acquire()?.play(request, limit).await
    }

    /// Wait for any outstanding request, then quit the engine.
    pub async fn shutdown(&self) {
        let mut slot = self.inner.lock().await;
        slot.engine.quit().await;
        slot.broken = true;
    }
}

/// Exclusive use of the engine for one request.
pub struct EngineLease {
    slot: OwnedMutexGuard<EngineSlot>,
}

impl EngineLease {
    fn ready(&self) -> Result<(), EngineError> {
        if self.slot.broken {
            Err(EngineError::Broken)
        } else {
            Ok(())
        }
    }

    fn settle<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(e) = &result {
            if e.poisons() {
                warn!(error = %e, "Engine connection poisoned");
                self.slot.broken = true;
            }
        }
        result
    }

    pub fn skill_level(&self) -> Option<u8> {
        self.slot.engine.skill_level()
    }

    pub async fn configure(&mut self, level: u8) -> Result<(), EngineError> {
        self.ready()?;
        let result = self.slot.engine.configure_skill(level).await;
        self.settle(result)
    }

    pub async fn analyze(
        &mut self,
        request: &SearchRequest,
        limit: Duration,
    ) -> Result<EvaluationScore, EngineError> {
        self.ready()?;
        let result = self.slot.engine.analyze(request, limit).await;
        self.settle(result)
    }

    pub async fn play(
        &mut self,
        request: &SearchRequest,
        limit: Duration,
    ) -> Result<Move, EngineError> {
        self.ready()?;
        let result = self.slot.engine.best_move(request, limit).await;
        self.settle(result)
    }

    /// Replace the engine process with a fresh one from the same executable.
    pub async fn respawn(&mut self) -> Result<(), EngineError> {
        let path = self
            .slot
            .path
            .clone()
            .ok_or_else(|| EngineError::Unavailable("engine has no executable path".into()))?;
        let fresh = StockfishEngine::start(&path, self.slot.handshake_timeout).await?;
        let mut old = std::mem::replace(&mut self.slot.engine, fresh);
        old.quit().await;
        self.slot.broken = false;
        info!(path = %path.display(), "Engine respawned");
        Ok(())
    }
}
