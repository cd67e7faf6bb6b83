//! Message types for channel communication.

use serde::{Deserialize, Serialize};

/// Bot commands understood by PanoBot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotCommand {
    Start,
    Help,
    Clear,
    Stitch,
}

impl BotCommand {
    /// Get the command name without the leading slash.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Clear => "clear",
            Self::Stitch => "stitch",
        }
    }

    /// Parse a command from message text such as `/stitch` or `/stitch@PanoBot now`.
    ///
    /// Returns `None` for plain text and unknown commands.
    pub fn parse(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?;
        let name = first.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);

        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "clear" => Some(Self::Clear),
            "stitch" => Some(Self::Stitch),
            _ => None,
        }
    }
}

/// One size variant of an uploaded photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoVariant {
    /// Opaque file id, resolvable through the channel
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    /// Encoded size in bytes, when the platform reports it
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// A generic file attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAttachment {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Declared MIME type
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Inbound content kinds the bot reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundContent {
    /// A photo, offered in several resolutions
    Photo { variants: Vec<PhotoVariant> },
    /// A file attachment
    Document { document: DocumentAttachment },
    /// A slash command
    Command { command: BotCommand },
}

/// One inbound event from a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Platform update id
    pub update_id: i64,
    /// Chat the event came from; replies go back here
    pub chat_id: i64,
    /// User identifier (username or numeric id)
    pub user_id: String,
    pub content: InboundContent,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
    /// Trace id for correlating logs of this event
    pub trace_id: String,
}

impl InboundEvent {
    /// Short label of the content kind for logs.
    pub const fn kind(&self) -> &'static str {
        match self.content {
            InboundContent::Photo { .. } => "photo",
            InboundContent::Document { .. } => "document",
            InboundContent::Command { .. } => "command",
        }
    }
}

/// Outgoing message to send to a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target chat id
    pub chat_id: i64,
    pub content: OutgoingContent,
}

impl OutgoingMessage {
    /// Plain text reply.
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: OutgoingContent::Text { text: text.into() },
        }
    }

    /// HTML-formatted reply.
    pub fn html(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: OutgoingContent::Html { text: text.into() },
        }
    }

    /// File reply.
    pub fn document(chat_id: i64, data: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: OutgoingContent::Document {
                data,
                filename: filename.into(),
            },
        }
    }
}

/// Outgoing message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingContent {
    /// Plain text
    Text { text: String },
    /// HTML text
    Html { text: String },
    /// File
    Document { data: Vec<u8>, filename: String },
}
