//! Channel traits for implementing channel adapters.

use crate::message::{InboundEvent, OutgoingMessage};
use async_trait::async_trait;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("File download failed: {0}")]
    Download(String),
}

impl From<ChannelError> for pano_common::Error {
    fn from(err: ChannelError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Sends replies back to a chat.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send a message to the chat named in `message`.
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<()>;
}

/// Resolves opaque file ids handed out by a channel into raw bytes.
#[async_trait]
pub trait FileResolver: Send + Sync {
    /// Download the file behind `file_id`.
    async fn resolve(&self, file_id: &str) -> ChannelResult<Vec<u8>>;
}

/// Channel adapter trait.
///
/// Implement this trait to add support for a new messaging channel.
#[async_trait]
pub trait Channel: MessageSender + FileResolver {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Initialize the channel (connect, authenticate, etc.).
    async fn init(&mut self) -> ChannelResult<()>;

    /// Start listening for incoming events.
    ///
    /// Runs until the process stops, calling `callback` once per event.
    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundEvent) + Send + Sync + 'static;

    /// Shutdown the channel gracefully.
    async fn shutdown(&self) -> ChannelResult<()>;
}
