//! Configuration management for PanoBot.
//!
//! The service reads a single JSON file at `~/.panobot/config.json`. Every
//! section is optional and falls back to its defaults.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (PANOBOT_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PANOBOT_TELEGRAM_TOKEN` / `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `PANOBOT_REDIS_URL` → redis.url
//! - `PANOBOT_SESSION_TTL` → session.ttl_secs
//! - `PANOBOT_STITCHER` → stitcher.program
//! - `PANOBOT_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".panobot"),
        |dirs| dirs.home_dir().join(".panobot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub stitcher: StitcherConfig,

    #[serde(default)]
    pub messages: MessagesConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration (default path or `path`) with environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) =
            lookup("PANOBOT_TELEGRAM_TOKEN").or_else(|| lookup("TELEGRAM_BOT_TOKEN"))
        {
            self.telegram.bot_token = Some(token);
        }

        if let Some(url) = lookup("PANOBOT_REDIS_URL") {
            self.redis.url = url;
        }

        if let Some(ttl) = lookup("PANOBOT_SESSION_TTL") {
            match ttl.parse() {
                Ok(secs) => self.session.ttl_secs = secs,
                Err(_) => tracing::warn!(value = %ttl, "Ignoring invalid PANOBOT_SESSION_TTL"),
            }
        }

        if let Some(program) = lookup("PANOBOT_STITCHER") {
            self.stitcher.program = program;
        }

        if let Some(level) = lookup("PANOBOT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Check that the configuration can run the bot.
    pub fn validate(&self) -> crate::Result<()> {
        if self.bot_token().is_none() {
            return Err(crate::Error::Config(
                "telegram.bot_token is not set (or PANOBOT_TELEGRAM_TOKEN)".into(),
            ));
        }
        if self.session.ttl_secs == 0 {
            return Err(crate::Error::Config(
                "session.ttl_secs must be greater than zero".into(),
            ));
        }
        if self.transport.fetch_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "transport.fetch_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.stitcher.program.trim().is_empty() {
            return Err(crate::Error::Config("stitcher.program is empty".into()));
        }
        Ok(())
    }

    /// The bot token, if configured and non-empty.
    pub fn bot_token(&self) -> Option<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Telegram channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from BotFather.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Usernames or numeric user ids allowed to use the bot (`*` for everyone).
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,
    /// Bot API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Long-poll timeout passed to getUpdates.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_users: default_allowed_users(),
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

/// Redis session store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port/db).
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Prefix prepended to every session key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Connection timeout in seconds.
    #[serde(default = "default_redis_timeout")]
    pub timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            timeout_secs: default_redis_timeout(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_key_prefix() -> String {
    "panobot:session:".to_string()
}

fn default_redis_timeout() -> u64 {
    5
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity window after which a session expires.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    3600
}

/// Transport fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Upper bound for resolving one image reference to bytes.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}

/// External stitcher program configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitcherConfig {
    /// Program invoked as `{program} {args..} --output {out} {inputs..}`.
    #[serde(default = "default_stitcher_program")]
    pub program: String,
    /// Extra arguments placed before `--output`.
    #[serde(default = "default_stitcher_args")]
    pub args: Vec<String>,
}

impl Default for StitcherConfig {
    fn default() -> Self {
        Self {
            program: default_stitcher_program(),
            args: default_stitcher_args(),
        }
    }
}

fn default_stitcher_program() -> String {
    "pano-stitcher".to_string()
}

fn default_stitcher_args() -> Vec<String> {
    vec!["--mode".to_string(), "scans".to_string()]
}

/// User-facing texts that are not part of the fixed reply contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    /// Sent on /start (HTML).
    #[serde(default = "default_start_message")]
    pub start: String,
    /// Sent on /help and after /start.
    #[serde(default = "default_help_message")]
    pub help: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            start: default_start_message(),
            help: default_help_message(),
        }
    }
}

fn default_start_message() -> String {
    "<b>Hi!</b> I stitch overlapping screenshots and photos into one panorama.".to_string()
}

fn default_help_message() -> String {
    "Send me overlapping pictures (as photos or image files), then /stitch.\n\
     Pictures are kept for one hour.\n\
     /clear - forget uploaded pictures\n\
     /stitch - stitch uploaded pictures\n\
     /help - show this message"
        .to_string()
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.ttl_secs, 3600);
        assert_eq!(config.transport.fetch_timeout_secs, 30);
        assert_eq!(config.redis.key_prefix, "panobot:session:");
        assert_eq!(config.telegram.allowed_users, vec!["*".to_string()]);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.bot_token().is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"telegram": {{"bot_token": "123:ABC"}}, "session": {{"ttl_secs": 600}}}}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.bot_token(), Some("123:ABC"));
        assert_eq!(config.session.ttl_secs, 600);
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379/0");
        assert_eq!(config.stitcher.program, "pano-stitcher");
    }

    #[test]
    fn test_load_from_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TELEGRAM_BOT_TOKEN", "fallback-token"),
            ("PANOBOT_REDIS_URL", "redis://cache:6380/2"),
            ("PANOBOT_SESSION_TTL", "120"),
            ("PANOBOT_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.bot_token(), Some("fallback-token"));
        assert_eq!(config.redis.url, "redis://cache:6380/2");
        assert_eq!(config.session.ttl_secs, 120);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_env_override_prefers_panobot_token() {
        let mut config = Config::default();
        config.apply_overrides_from(|k| match k {
            "PANOBOT_TELEGRAM_TOKEN" => Some("primary".into()),
            "TELEGRAM_BOT_TOKEN" => Some("secondary".into()),
            _ => None,
        });
        assert_eq!(config.bot_token(), Some("primary"));
    }

    #[test]
    fn test_invalid_ttl_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(|k| (k == "PANOBOT_SESSION_TTL").then(|| "soon".into()));
        assert_eq!(config.session.ttl_secs, 3600);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.telegram.bot_token = Some("123:ABC".into());
        assert!(config.validate().is_ok());

        config.session.ttl_secs = 0;
        assert!(config.validate().is_err());

        config.session.ttl_secs = 3600;
        config.stitcher.program = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_fetch_timeout() {
        let mut config = Config::default();
        config.telegram.bot_token = Some("123:ABC".into());
        config.transport.fetch_timeout_secs = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("transport.fetch_timeout_secs"));

        config.transport.fetch_timeout_secs = 1;
        assert!(config.validate().is_ok());
    }
}
