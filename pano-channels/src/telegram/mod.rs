//! Telegram channel adapter.
//!
//! Provides the `TelegramChannel` implementation for receiving photos,
//! documents and commands and sending replies through the Telegram Bot API.

use crate::message::{
    BotCommand, DocumentAttachment, InboundContent, InboundEvent, OutgoingContent,
    OutgoingMessage, PhotoVariant,
};
use crate::traits::{Channel, ChannelError, ChannelResult, FileResolver, MessageSender};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;

/// Telegram's hard limit for one text message.
const MAX_MESSAGE_LEN: usize = 4096;

/// Pause after a failed poll before retrying.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

// ============================================================================
// Telegram Channel
// ============================================================================

/// Telegram channel - long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 30,
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API server (local bot API, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the getUpdates long-poll timeout.
    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path)
    }

    fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    /// Download a file from Telegram by its `file_id`.
    async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        // Step 1: Get the file path via getFile API
        let url = self.api_url("getFile");
        let body = serde_json::json!({ "file_id": file_id });

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram getFile failed: {err}");
        }

        let data: Value = resp.json().await?;
        let file_path = data
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(|p| p.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing file_path in getFile response"))?;

        // Step 2: Download the file
        let download_url = self.file_url(file_path);
        let file_resp = self.client.get(&download_url).send().await?;

        if !file_resp.status().is_success() {
            anyhow::bail!(
                "Failed to download file from Telegram: {}",
                file_resp.status()
            );
        }

        let bytes = file_resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Send a document from bytes (in-memory) to a Telegram chat
    pub async fn send_document_bytes(
        &self,
        chat_id: i64,
        file_bytes: Vec<u8>,
        file_name: &str,
    ) -> anyhow::Result<()> {
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendDocument failed: {err}");
        }

        tracing::info!(chat_id, file_name, "Telegram document sent");
        Ok(())
    }

    /// Send one plain text message.
    async fn send_plain(&self, text: &str, chat_id: i64) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }

        let err = resp.text().await.unwrap_or_default();
        anyhow::bail!("Telegram sendMessage failed: {err}")
    }

    /// Send one HTML message, retrying as plain text if Telegram rejects the markup.
    async fn send_html(&self, text: &str, chat_id: i64) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML"
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }

        let status = resp.status();
        let error_text = resp.text().await.unwrap_or_default();

        // Telegram returns "Bad Request: can't parse entities" for HTML errors
        if status.as_u16() == 400 && error_text.contains("parse entities") {
            tracing::warn!(
                "Telegram HTML parsing failed, retrying without parse_mode: {}",
                error_text
            );
            return self.send_plain(text, chat_id).await;
        }

        anyhow::bail!("Telegram sendMessage failed: {error_text}")
    }

    /// Turn one getUpdates entry into an event, applying the allow-list.
    fn event_from_update(&self, update: &Value) -> Option<InboundEvent> {
        let parsed = parse_update(update)?;

        let mut identities: Vec<&str> = vec![parsed.user_id.as_str()];
        if let Some(ref name) = parsed.username {
            identities.push(name.as_str());
        }

        if !self.is_any_user_allowed(identities.iter().copied()) {
            tracing::warn!(
                user_id = %parsed.user_id,
                "Telegram: ignoring message from unauthorized user"
            );
            return None;
        }

        Some(InboundEvent {
            update_id: parsed.update_id,
            chat_id: parsed.chat_id,
            user_id: parsed.username.unwrap_or(parsed.user_id),
            content: parsed.content,
            timestamp: chrono::Utc::now().timestamp_millis(),
            trace_id: pano_common::logging::generate_trace_id(),
        })
    }
}

/// Fields extracted from a Telegram update before authorization.
#[derive(Debug, Clone, PartialEq)]
struct ParsedUpdate {
    update_id: i64,
    chat_id: i64,
    user_id: String,
    username: Option<String>,
    content: InboundContent,
}

/// Parse a raw update. Only private chats carrying a photo, a document or a
/// known command produce a value.
fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    let update_id = update.get("update_id")?.as_i64()?;
    let message = update.get("message")?;

    let chat = message.get("chat")?;
    if chat.get("type").and_then(Value::as_str) != Some("private") {
        tracing::debug!(update_id, "Telegram: ignoring non-private chat");
        return None;
    }
    let chat_id = chat.get("id")?.as_i64()?;

    let from = message.get("from");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64)
        .map_or_else(|| chat_id.to_string(), |id| id.to_string());
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .map(String::from);

    let content = if let Some(photo) = message.get("photo").and_then(Value::as_array) {
        let variants = photo.iter().filter_map(parse_photo_variant).collect();
        InboundContent::Photo { variants }
    } else if let Some(doc) = message.get("document") {
        let file_id = doc.get("file_id")?.as_str()?.to_string();
        InboundContent::Document {
            document: DocumentAttachment {
                file_id,
                file_name: doc.get("file_name").and_then(Value::as_str).map(String::from),
                mime_type: doc.get("mime_type").and_then(Value::as_str).map(String::from),
                file_size: doc.get("file_size").and_then(Value::as_u64),
            },
        }
    } else if let Some(text) = message.get("text").and_then(Value::as_str) {
        InboundContent::Command {
            command: BotCommand::parse(text)?,
        }
    } else {
        return None;
    };

    Some(ParsedUpdate {
        update_id,
        chat_id,
        user_id,
        username,
        content,
    })
}

fn parse_photo_variant(size: &Value) -> Option<PhotoVariant> {
    Some(PhotoVariant {
        file_id: size.get("file_id")?.as_str()?.to_string(),
        width: size.get("width").and_then(Value::as_u64).unwrap_or(0) as u32,
        height: size.get("height").and_then(Value::as_u64).unwrap_or(0) as u32,
        file_size: size.get("file_size").and_then(Value::as_u64),
    })
}

/// Split a message into chunks that fit within Telegram's limit.
fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }

        let chunk = &remaining[..boundary];
        let split_pos = chunk
            .rfind("\n\n")
            .or_else(|| chunk.rfind('\n'))
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        let actual_split = if split_pos == 0 { boundary } else { split_pos };

        chunks.push(remaining[..actual_split].to_string());
        remaining = remaining[actual_split..].trim_start();
    }

    chunks
}

#[async_trait]
impl MessageSender for TelegramChannel {
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<()> {
        match message.content {
            OutgoingContent::Text { text } => {
                for chunk in split_message(&text, MAX_MESSAGE_LEN) {
                    self.send_plain(&chunk, message.chat_id)
                        .await
                        .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
                }
            }
            OutgoingContent::Html { text } => {
                self.send_html(&text, message.chat_id)
                    .await
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            }
            OutgoingContent::Document { data, filename } => {
                self.send_document_bytes(message.chat_id, data, &filename)
                    .await
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl FileResolver for TelegramChannel {
    async fn resolve(&self, file_id: &str) -> ChannelResult<Vec<u8>> {
        self.download_file(file_id)
            .await
            .map_err(|e| ChannelError::Download(e.to_string()))
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn init(&mut self) -> ChannelResult<()> {
        // Verify bot token by calling getMe
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Auth(format!("Invalid bot token: {err}")));
        }

        tracing::info!("Telegram channel initialized");
        Ok(())
    }

    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"]
            });

            let resp = match self
                .client
                .post(self.api_url("getUpdates"))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let data: Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let Some(results) = data.get("result").and_then(Value::as_array) else {
                tracing::warn!(response = %data, "Telegram getUpdates returned no result");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            };

            for update in results {
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(event) = self.event_from_update(update) else {
                    continue;
                };

                tracing::info!(
                    trace_id = %event.trace_id,
                    update_id = event.update_id,
                    chat_id = event.chat_id,
                    user_id = %event.user_id,
                    message_type = event.kind(),
                    "Telegram update received"
                );

                callback(event);
            }
        }
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}
