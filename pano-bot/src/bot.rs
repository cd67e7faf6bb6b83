//! Command dispatcher: routes inbound chat events and renders replies.

use crate::ingest::{ImageIngestAdapter, Ingested};
use crate::orchestrator::{SessionOrchestrator, StitchOutcome};
use crate::session::SessionId;
use chrono::{DateTime, Local, TimeZone};
use pano_channels::{BotCommand, InboundContent, InboundEvent, MessageSender, OutgoingMessage};
use pano_common::config::MessagesConfig;
use pano_common::ResultExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

pub const CLEARED_REPLY: &str = "Pictures cleared. /help";
pub const NEED_MORE_REPLY: &str =
    "Not enough images. Please try screenshots with more overlap. /help";
pub const STITCH_ERROR_REPLY: &str = "Unknown error while stitching. Please try again. /help";

/// A per-chat worker asks to be retired after this long without events.
const WORKER_IDLE: Duration = Duration::from_secs(60);

/// Reply sent after an image was stored.
pub fn uploaded_reply(count: usize) -> String {
    format!("{count} pictures uploaded")
}

/// `stitched{YYYYmmddHHMMSS}.png`
pub fn panorama_filename<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("stitched{}.png", at.format("%Y%m%d%H%M%S"))
}

/// Turn a stitch outcome into the reply for `chat_id`.
pub fn render_outcome(
    chat_id: i64,
    outcome: StitchOutcome,
    now: &DateTime<Local>,
) -> OutgoingMessage {
    match outcome {
        StitchOutcome::Success(png) => {
            OutgoingMessage::document(chat_id, png, panorama_filename(now))
        }
        StitchOutcome::NeedMoreImages => OutgoingMessage::text(chat_id, NEED_MORE_REPLY),
        StitchOutcome::Error(_) => OutgoingMessage::text(chat_id, STITCH_ERROR_REPLY),
    }
}

/// The PanoBot conversation logic on top of the orchestrator.
pub struct StitchBot {
    orchestrator: Arc<SessionOrchestrator>,
    ingest: ImageIngestAdapter,
    sender: Arc<dyn MessageSender>,
    messages: MessagesConfig,
}

impl StitchBot {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        sender: Arc<dyn MessageSender>,
        messages: MessagesConfig,
    ) -> Self {
        Self {
            ingest: ImageIngestAdapter::new(orchestrator.clone()),
            orchestrator,
            sender,
            messages,
        }
    }

    /// Handle one inbound event to completion.
    ///
    /// Store failures come back as [`pano_common::Error::Store`] (see
    /// [`pano_common::Error::is_store`]), reply failures as `Transport`.
    pub async fn handle(&self, event: InboundEvent) -> pano_common::Result<()> {
        let chat_id = event.chat_id;
        let session = SessionId::new(chat_id);

        match event.content {
            InboundContent::Photo { variants } => {
                let ingested = self
                    .ingest
                    .ingest_photo(session, &variants)
                    .await
                    .context("Failed to store photo")?;
                self.acknowledge(chat_id, ingested).await
            }
            InboundContent::Document { document } => {
                let ingested = self
                    .ingest
                    .ingest_document(session, &document)
                    .await
                    .context("Failed to store document")?;
                self.acknowledge(chat_id, ingested).await
            }
            InboundContent::Command { command } => self.command(chat_id, command).await,
        }
    }

    async fn acknowledge(&self, chat_id: i64, ingested: Ingested) -> pano_common::Result<()> {
        match ingested {
            Ingested::Stored(count) => {
                self.reply(OutgoingMessage::text(chat_id, uploaded_reply(count)))
                    .await
            }
            Ingested::Skipped(_) => Ok(()),
        }
    }

    async fn command(&self, chat_id: i64, command: BotCommand) -> pano_common::Result<()> {
        let session = SessionId::new(chat_id);
        tracing::debug!(chat_id, command = command.as_str(), "Command");

        match command {
            BotCommand::Start => {
                self.reply(OutgoingMessage::html(chat_id, self.messages.start.clone()))
                    .await?;
                self.reply(OutgoingMessage::text(chat_id, self.messages.help.clone()))
                    .await
            }
            BotCommand::Help => {
                self.reply(OutgoingMessage::text(chat_id, self.messages.help.clone()))
                    .await
            }
            BotCommand::Clear => {
                self.orchestrator
                    .clear_session(session)
                    .await
                    .context("Failed to clear session")?;
                self.reply(OutgoingMessage::text(chat_id, CLEARED_REPLY)).await
            }
            BotCommand::Stitch => {
                let outcome = self
                    .orchestrator
                    .request_stitch(session)
                    .await
                    .context("Failed to stitch session")?;
                self.reply(render_outcome(chat_id, outcome, &Local::now()))
                    .await
            }
        }
    }

    async fn reply(&self, message: OutgoingMessage) -> pano_common::Result<()> {
        let chat_id = message.chat_id;
        self.sender
            .send(message)
            .await
            .context(format!("Failed to reply to chat {chat_id}"))
    }

    /// Start the background processor feeding events from `rx` to the bot.
    ///
    /// Chats are handled concurrently; events of one chat are handled one
    /// after the other, in arrival order. Idle chat workers are retired by
    /// the processor; a replacement worker waits for the retired one to
    /// finish its queue before it starts.
    pub fn spawn_processor(bot: Arc<Self>, mut rx: mpsc::Receiver<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("PanoBot processor started");

            let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<i64>();
            let mut workers: HashMap<i64, ChatWorker> = HashMap::new();
            let mut retiring: HashMap<i64, JoinHandle<()>> = HashMap::new();

            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let chat_id = event.chat_id;

                        let worker = workers.entry(chat_id).or_insert_with(|| {
                            let (tx, worker_rx) = mpsc::unbounded_channel();
                            let predecessor = retiring.remove(&chat_id);
                            let handle = tokio::spawn(chat_worker(
                                bot.clone(),
                                chat_id,
                                worker_rx,
                                predecessor,
                                idle_tx.clone(),
                            ));
                            ChatWorker { tx, handle }
                        });

                        if worker.tx.send(event).is_err() {
                            tracing::warn!(chat_id, "Chat worker stopped, dropping update");
                            workers.remove(&chat_id);
                        }
                    }
                    Some(chat_id) = idle_rx.recv() => {
                        // Dropping the sender lets the worker drain its queue and exit.
                        if let Some(worker) = workers.remove(&chat_id) {
                            retiring.insert(chat_id, worker.handle);
                        }
                        retiring.retain(|_, handle| !handle.is_finished());
                    }
                }
            }

            tracing::info!("PanoBot processor stopped");
        })
    }
}

struct ChatWorker {
    tx: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

/// Handles the events of one chat, in order, until the processor retires it.
async fn chat_worker(
    bot: Arc<StitchBot>,
    chat_id: i64,
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    predecessor: Option<JoinHandle<()>>,
    idle: mpsc::UnboundedSender<i64>,
) {
    if let Some(predecessor) = predecessor {
        if let Err(e) = predecessor.await {
            tracing::warn!(chat_id, error = %e, "Previous chat worker failed");
        }
    }

    loop {
        match tokio::time::timeout(WORKER_IDLE, rx.recv()).await {
            Ok(Some(event)) => process(&bot, event).await,
            Ok(None) => break,
            Err(_) => {
                // Events may still arrive until the processor drops our sender.
                let _ = idle.send(chat_id);
                while let Some(event) = rx.recv().await {
                    process(&bot, event).await;
                }
                break;
            }
        }
    }

    tracing::debug!(chat_id, "Chat worker stopped");
}

async fn process(bot: &StitchBot, event: InboundEvent) {
    let span = tracing::info_span!(
        "event",
        trace_id = %event.trace_id,
        update_id = event.update_id,
        chat_id = event.chat_id,
        kind = event.kind(),
    );
    let update_id = event.update_id;

    async {
        match bot.handle(event).await {
            Ok(()) => {}
            Err(e) if e.is_store() => {
                tracing::error!(update_id, error = %e, "Session store failure, update dropped");
            }
            Err(e) => {
                tracing::warn!(update_id, error = %e, "Failed to handle update");
            }
        }
    }
    .instrument(span)
    .await;
}
