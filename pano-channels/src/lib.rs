//! Pano Channels - Chat channel adapters for PanoBot.
//!
//! The channel layer turns platform updates into typed [`InboundEvent`]s and
//! sends [`OutgoingMessage`]s back. It also resolves the opaque file ids it
//! hands out into raw bytes when the bot needs the pictures.
//!
//! ```text
//! User IM → getUpdates → TelegramChannel → InboundEvent → bot
//! User ←── sendMessage/sendDocument ←── OutgoingMessage ←┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod message;
pub mod telegram;
pub mod traits;

pub use message::{
    BotCommand, DocumentAttachment, InboundContent, InboundEvent, OutgoingContent,
    OutgoingMessage, PhotoVariant,
};
pub use telegram::TelegramChannel;
pub use traits::{Channel, ChannelError, ChannelResult, FileResolver, MessageSender};
