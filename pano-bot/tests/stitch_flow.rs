//! End-to-end conversations through `StitchBot` with in-process collaborators.

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use pano_bot::bot::{CLEARED_REPLY, NEED_MORE_REPLY, STITCH_ERROR_REPLY};
use pano_bot::{
    DecodedImage, EngineError, EngineOutput, InMemorySessionStore, OrchestratorSettings,
    SessionId, SessionOrchestrator, SessionStore, StitchBot, StitchStatus, StitchingEngine,
};
use pano_channels::{
    BotCommand, ChannelError, ChannelResult, DocumentAttachment, FileResolver, InboundContent,
    InboundEvent, MessageSender, OutgoingContent, OutgoingMessage, PhotoVariant,
};
use pano_common::config::MessagesConfig;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CHAT: i64 = 555;

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 9, 9])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Stands in for the chat platform: serves files and records replies.
#[derive(Default)]
struct FakeChat {
    files: Mutex<HashMap<String, Vec<u8>>>,
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl FakeChat {
    fn upload(&self, file_id: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(file_id.to_string(), bytes);
    }

    fn replies(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn last_text(&self) -> String {
        match self.replies().last().map(|m| m.content.clone()) {
            Some(OutgoingContent::Text { text }) => text,
            other => panic!("expected a text reply, got {other:?}"),
        }
    }
}

#[async_trait]
impl FileResolver for FakeChat {
    async fn resolve(&self, file_id: &str) -> ChannelResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| ChannelError::Download(format!("file {file_id} expired")))
    }
}

#[async_trait]
impl MessageSender for FakeChat {
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Places the inputs side by side; needs at least two.
struct SideBySide;

#[async_trait]
impl StitchingEngine for SideBySide {
    async fn stitch(&self, images: Vec<DecodedImage>) -> Result<EngineOutput, EngineError> {
        if images.len() < 2 {
            return Ok(EngineOutput::failed(StitchStatus::NeedMoreImages));
        }
        let width = images.iter().map(|i| i.width()).sum();
        let height = images.iter().map(|i| i.height()).max().unwrap_or(0);
        let mut canvas = RgbImage::new(width, height);
        let mut x = 0;
        for img in &images {
            image::imageops::replace(&mut canvas, &img.to_rgb8(), i64::from(x), 0);
            x += img.width();
        }
        Ok(EngineOutput::success(DynamicImage::ImageRgb8(canvas)))
    }
}

struct Harness {
    bot: StitchBot,
    chat: Arc<FakeChat>,
    store: Arc<InMemorySessionStore>,
}

fn harness() -> Harness {
    let chat = Arc::new(FakeChat::default());
    let store = Arc::new(InMemorySessionStore::new());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        store.clone(),
        chat.clone(),
        Arc::new(SideBySide),
        OrchestratorSettings {
            session_ttl_secs: 3600,
            fetch_timeout: Duration::from_secs(5),
        },
    ));
    let bot = StitchBot::new(orchestrator, chat.clone(), MessagesConfig::default());
    Harness { bot, chat, store }
}

fn event(update_id: i64, content: InboundContent) -> InboundEvent {
    InboundEvent {
        update_id,
        chat_id: CHAT,
        user_id: "bob".to_string(),
        content,
        timestamp: 1_700_000_000_000,
        trace_id: format!("trace-{update_id}"),
    }
}

fn photo(update_id: i64, sizes: &[(&str, u64)]) -> InboundEvent {
    event(
        update_id,
        InboundContent::Photo {
            variants: sizes
                .iter()
                .map(|(id, size)| PhotoVariant {
                    file_id: id.to_string(),
                    width: 4,
                    height: 4,
                    file_size: Some(*size),
                })
                .collect(),
        },
    )
}

fn command(update_id: i64, command: BotCommand) -> InboundEvent {
    event(update_id, InboundContent::Command { command })
}

#[tokio::test]
async fn test_upload_then_stitch_returns_panorama_document() {
    let h = harness();
    h.chat.upload("left-large", png(4, 3));
    h.chat.upload("right", png(5, 3));
    h.chat.upload("scan", png(6, 3));

    h.bot
        .handle(photo(1, &[("left-small", 10), ("left-large", 90)]))
        .await
        .unwrap();
    assert_eq!(h.chat.last_text(), "1 pictures uploaded");

    h.bot.handle(photo(2, &[("right", 50)])).await.unwrap();
    assert_eq!(h.chat.last_text(), "2 pictures uploaded");

    h.bot
        .handle(event(
            3,
            InboundContent::Document {
                document: DocumentAttachment {
                    file_id: "scan".to_string(),
                    file_name: Some("scan.png".to_string()),
                    mime_type: Some("image/png".to_string()),
                    file_size: Some(123),
                },
            },
        ))
        .await
        .unwrap();
    assert_eq!(h.chat.last_text(), "3 pictures uploaded");

    h.bot.handle(command(4, BotCommand::Stitch)).await.unwrap();

    let last = h.chat.replies().pop().unwrap();
    assert_eq!(last.chat_id, CHAT);
    let OutgoingContent::Document { data, filename } = last.content else {
        panic!("expected a document reply");
    };
    assert!(filename.starts_with("stitched") && filename.ends_with(".png"));
    assert_eq!(filename.len(), "stitched".len() + 14 + ".png".len());

    let panorama = image::load_from_memory_with_format(&data, ImageFormat::Png).unwrap();
    assert_eq!(panorama.dimensions(), (15, 3));

    assert!(h.store.read_all(SessionId::new(CHAT)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_picture_gets_need_more_advice_and_session_resets() {
    let h = harness();
    h.chat.upload("only", png(4, 4));

    h.bot.handle(photo(1, &[("only", 10)])).await.unwrap();
    h.bot.handle(command(2, BotCommand::Stitch)).await.unwrap();
    assert_eq!(h.chat.last_text(), NEED_MORE_REPLY);

    // The next upload starts a new session.
    h.chat.upload("again", png(4, 4));
    h.bot.handle(photo(3, &[("again", 10)])).await.unwrap();
    assert_eq!(h.chat.last_text(), "1 pictures uploaded");
}

#[tokio::test]
async fn test_expired_file_reports_generic_error_and_clears() {
    let h = harness();
    h.chat.upload("a", png(4, 4));

    h.bot.handle(photo(1, &[("a", 10)])).await.unwrap();
    h.bot.handle(photo(2, &[("gone", 10)])).await.unwrap();
    h.bot.handle(command(3, BotCommand::Stitch)).await.unwrap();

    assert_eq!(h.chat.last_text(), STITCH_ERROR_REPLY);
    assert_eq!(h.store.session_count().await, 0);
}

#[tokio::test]
async fn test_clear_then_stitch_sees_empty_session() {
    let h = harness();
    h.chat.upload("a", png(4, 4));
    h.chat.upload("b", png(4, 4));

    h.bot.handle(photo(1, &[("a", 10)])).await.unwrap();
    h.bot.handle(photo(2, &[("b", 10)])).await.unwrap();
    h.bot.handle(command(3, BotCommand::Clear)).await.unwrap();
    assert_eq!(h.chat.last_text(), CLEARED_REPLY);

    h.bot.handle(command(4, BotCommand::Stitch)).await.unwrap();
    assert_eq!(h.chat.last_text(), NEED_MORE_REPLY);
}

#[tokio::test]
async fn test_help_replies_with_configured_text() {
    let h = harness();
    h.bot.handle(command(1, BotCommand::Help)).await.unwrap();
    assert_eq!(h.chat.last_text(), MessagesConfig::default().help);
}
