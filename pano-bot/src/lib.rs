//! PanoBot - buffers pictures per chat and stitches them into a panorama.
//!
//! ```text
//! TelegramChannel ─▶ StitchBot ─▶ ImageIngestAdapter ─▶ SessionOrchestrator ─▶ SessionStore
//!        ▲               │                                     │
//!        │               └── /stitch /clear ──────────────────▶│── FileResolver (TelegramChannel)
//!        └──── replies ◀─────────────────────────────────────  └── StitchingEngine
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod bot;
pub mod engine;
pub mod ingest;
pub mod orchestrator;
pub mod session;
pub mod store;

pub use bot::StitchBot;
pub use engine::{
    DecodedImage, EngineError, EngineOutput, ProcessStitcher, StitchStatus, StitchingEngine,
};
pub use ingest::{ImageIngestAdapter, Ingested, SkipReason};
pub use orchestrator::{
    OrchestratorError, OrchestratorSettings, SessionOrchestrator, StitchFailure, StitchOutcome,
};
pub use session::{ImageRef, SessionId};
pub use store::{InMemorySessionStore, RedisSessionStore, SessionStore, StoreError, StoreResult};

use pano_channels::{Channel, TelegramChannel};
use pano_common::config::Config;
use pano_common::ResultExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound events buffered between the poller and the processor.
const EVENT_QUEUE: usize = 256;

/// Fail unless `store` answers.
pub async fn ensure_store_ready(store: &dyn SessionStore) -> pano_common::Result<()> {
    if store.is_healthy().await {
        Ok(())
    } else {
        Err(pano_common::Error::Store(
            "session store did not answer PING".to_string(),
        ))
    }
}

/// Run the bot until Ctrl-C.
pub async fn start_bot(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    let token = config
        .bot_token()
        .ok_or_else(|| pano_common::Error::Config("telegram.bot_token is not set".into()))?
        .to_string();

    let store = Arc::new(
        RedisSessionStore::connect(&config.redis)
            .await
            .context("Failed to connect to Redis")?,
    );
    ensure_store_ready(store.as_ref())
        .await
        .context(format!("Redis at {} is not usable", config.redis.url))?;

    let mut telegram = TelegramChannel::new(token, config.telegram.allowed_users.clone())
        .with_api_base(config.telegram.api_base.clone())
        .with_poll_timeout(config.telegram.poll_timeout_secs);
    telegram
        .init()
        .await
        .context("Failed to initialize Telegram channel")?;
    let telegram = Arc::new(telegram);

    let engine = Arc::new(ProcessStitcher::from_config(&config.stitcher));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        store.clone(),
        telegram.clone(),
        engine,
        OrchestratorSettings::from_config(config),
    ));
    let bot = Arc::new(StitchBot::new(
        orchestrator,
        telegram.clone(),
        config.messages.clone(),
    ));

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let processor_handle = StitchBot::spawn_processor(bot, rx);

    tracing::info!(
        channel = telegram.name(),
        stitcher = %config.stitcher.program,
        session_ttl_secs = config.session.ttl_secs,
        "PanoBot started"
    );

    let listener = telegram.listen(move |event| {
        if let Err(e) = tx.try_send(event) {
            tracing::warn!(error = %e, "Dropping update, processor is saturated");
        }
    });

    tokio::select! {
        result = listener => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Telegram listener stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    processor_handle.abort();
    telegram.shutdown().await.ok();
    store.close().await;

    tracing::info!("PanoBot stopped");
    Ok(())
}
