//! Pano Common - Shared configuration, error types and logging for PanoBot.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - The unified error type and context helpers
//! - Logging setup and trace id helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    Config, MessagesConfig, ObservabilityConfig, RedisConfig, SessionConfig, StitcherConfig,
    TelegramConfig, TransportConfig,
};
pub use error::{Error, Result, ResultExt};
