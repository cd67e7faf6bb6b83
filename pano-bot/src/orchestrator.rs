//! Session orchestrator.
//!
//! Owns the session lifecycle:
//!
//! ```text
//!            ingest (TTL re-armed)
//!              ┌──────┐
//!   ingest     ▼      │   stitch (any outcome) / clear / TTL elapsed
//! Absent ───────▶ Active ──────────────────────────────────────▶ Absent
//! ```
//!
//! A stitch reads the session, resolves every reference through the
//! transport, runs the engine and then deletes the session no matter how
//! the previous steps ended.

use crate::engine::{DecodedImage, EngineOutput, StitchStatus, StitchingEngine};
use crate::session::{ImageRef, SessionId};
use crate::store::{SessionStore, StoreError};
use dashmap::DashMap;
use pano_channels::FileResolver;
use pano_common::Config;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Result of one stitch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StitchOutcome {
    /// PNG-encoded panorama.
    Success(Vec<u8>),
    /// The engine needs more (or more overlapping) images.
    NeedMoreImages,
    Error(StitchFailure),
}

/// Why a stitch request produced no panorama.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StitchFailure {
    /// The engine returned a status other than OK / need-more-images.
    Engine(i32),
    /// The engine adapter itself failed (spawn, I/O, missing output).
    EngineFault(String),
    /// A stored reference could not be fetched from the transport.
    Resolve { image: ImageRef, reason: String },
    /// Fetched bytes are not a supported image.
    Decode { image: ImageRef, reason: String },
    /// The panorama could not be encoded as PNG.
    Encode(String),
}

/// Infrastructure errors that escape the orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl From<OrchestratorError> for pano_common::Error {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Store(e) => e.into(),
        }
    }
}

/// Tunables of the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Sliding inactivity window of a session.
    pub session_ttl_secs: u64,
    /// Bound on fetching one reference from the transport.
    pub fetch_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3600,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_ttl_secs: config.session.ttl_secs,
            fetch_timeout: Duration::from_secs(config.transport.fetch_timeout_secs),
        }
    }
}

/// Buffers image references per session and drives stitching.
pub struct SessionOrchestrator {
    store: Arc<dyn SessionStore>,
    resolver: Arc<dyn FileResolver>,
    engine: Arc<dyn StitchingEngine>,
    settings: OrchestratorSettings,
    /// One lock per session with a stitch in flight (or queued).
    stitch_locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        resolver: Arc<dyn FileResolver>,
        engine: Arc<dyn StitchingEngine>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            resolver,
            engine,
            settings,
            stitch_locks: DashMap::new(),
        }
    }

    /// Prepend `image` to the session, re-arm its TTL and return the new count.
    pub async fn append_reference(
        &self,
        session: SessionId,
        image: ImageRef,
    ) -> Result<usize, OrchestratorError> {
        let count = self.store.push(session, &image).await?;
        self.store
            .set_expire(session, self.settings.session_ttl_secs)
            .await?;

        tracing::info!(session_id = %session, count, "Image reference stored");
        Ok(count)
    }

    /// Drop everything buffered for `session`.
    pub async fn clear_session(&self, session: SessionId) -> Result<(), OrchestratorError> {
        self.store.delete(session).await?;
        tracing::info!(session_id = %session, "Session cleared");
        Ok(())
    }

    /// Stitch everything buffered for `session`, then clear it.
    ///
    /// Only store failures are returned as `Err`; every other failure is an
    /// [`StitchOutcome::Error`]. The session is deleted in every case.
    pub async fn request_stitch(
        &self,
        session: SessionId,
    ) -> Result<StitchOutcome, OrchestratorError> {
        let lock = self.stitch_lock(session);
        let guard = lock.lock().await;

        tracing::info!(session_id = %session, "Stitching");

        let result = self.run_stitch(session).await;
        let cleared = self.store.delete(session).await;

        drop(guard);
        self.release_stitch_lock(session, &lock);

        match (result, cleared) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => {
                tracing::error!(
                    session_id = %session,
                    error = %e,
                    "Failed to clear session after stitch"
                );
                Err(e.into())
            }
            (Err(e), cleared) => {
                if let Err(clear_err) = cleared {
                    tracing::error!(
                        session_id = %session,
                        error = %clear_err,
                        "Failed to clear session after stitch"
                    );
                }
                Err(e)
            }
        }
    }

    fn stitch_lock(&self, session: SessionId) -> Arc<Mutex<()>> {
        self.stitch_locks.entry(session).or_default().value().clone()
    }

    /// Forget the lock once nobody else holds or waits on it.
    fn release_stitch_lock(&self, session: SessionId, lock: &Arc<Mutex<()>>) {
        // Map entry + our handle.
        self.stitch_locks.remove_if(&session, |_, held| {
            Arc::ptr_eq(held, lock) && Arc::strong_count(held) == 2
        });
    }

    async fn run_stitch(&self, session: SessionId) -> Result<StitchOutcome, OrchestratorError> {
        let refs = self.store.read_all(session).await?;
        tracing::debug!(session_id = %session, images = refs.len(), "Read session");

        let images = match self.resolve_all(&refs).await {
            Ok(images) => images,
            Err(failure) => {
                tracing::warn!(
                    session_id = %session,
                    failure = ?failure,
                    "Could not load session images"
                );
                return Ok(StitchOutcome::Error(failure));
            }
        };

        let result = self.engine.stitch(images).await;
        Ok(self.interpret(session, result).await)
    }

    /// Fetch and decode every reference; the first failure aborts.
    async fn resolve_all(&self, refs: &[ImageRef]) -> Result<Vec<DecodedImage>, StitchFailure> {
        let mut images = Vec::with_capacity(refs.len());

        for image_ref in refs {
            let fetched = tokio::time::timeout(
                self.settings.fetch_timeout,
                self.resolver.resolve(image_ref.as_str()),
            )
            .await;

            let bytes = match fetched {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    return Err(StitchFailure::Resolve {
                        image: image_ref.clone(),
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(StitchFailure::Resolve {
                        image: image_ref.clone(),
                        reason: format!(
                            "timed out after {}s",
                            self.settings.fetch_timeout.as_secs()
                        ),
                    })
                }
            };

            let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
                .await
                .map_err(|e| StitchFailure::Decode {
                    image: image_ref.clone(),
                    reason: e.to_string(),
                })?
                .map_err(|e| StitchFailure::Decode {
                    image: image_ref.clone(),
                    reason: e.to_string(),
                })?;

            images.push(decoded);
        }

        Ok(images)
    }

    async fn interpret(
        &self,
        session: SessionId,
        result: Result<EngineOutput, crate::engine::EngineError>,
    ) -> StitchOutcome {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(session_id = %session, error = %e, "Stitching engine failed");
                return StitchOutcome::Error(StitchFailure::EngineFault(e.to_string()));
            }
        };

        match (output.status, output.panorama) {
            (StitchStatus::Ok, Some(panorama)) => match encode_png(panorama).await {
                Ok(bytes) => {
                    tracing::info!(
                        session_id = %session,
                        bytes = bytes.len(),
                        "Stitching succeeded"
                    );
                    StitchOutcome::Success(bytes)
                }
                Err(reason) => {
                    tracing::error!(
                        session_id = %session,
                        error = %reason,
                        "Failed to encode panorama"
                    );
                    StitchOutcome::Error(StitchFailure::Encode(reason))
                }
            },
            (StitchStatus::Ok, None) => {
                tracing::error!(
                    session_id = %session,
                    "Engine reported success without a panorama"
                );
                StitchOutcome::Error(StitchFailure::EngineFault(
                    "engine reported success without a panorama".to_string(),
                ))
            }
            (StitchStatus::NeedMoreImages, _) => {
                tracing::info!(session_id = %session, "Stitching failed, not enough images");
                StitchOutcome::NeedMoreImages
            }
            (status, _) => {
                tracing::warn!(session_id = %session, code = status.code(), "Stitching failed");
                StitchOutcome::Error(StitchFailure::Engine(status.code()))
            }
        }
    }
}

/// Encode losslessly as PNG on the blocking pool.
async fn encode_png(panorama: DecodedImage) -> Result<Vec<u8>, String> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
        let mut buf = Cursor::new(Vec::new());
        panorama
            .write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| e.to_string())?;
        Ok(buf.into_inner())
    })
    .await
    .map_err(|e| e.to_string())?
}
