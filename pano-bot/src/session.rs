//! Session identity and image reference types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one buffered session. One chat owns exactly one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(i64);

impl SessionId {
    pub const fn new(chat_id: i64) -> Self {
        Self(chat_id)
    }

    /// The underlying chat id.
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Store key for this session: `{prefix}{chat_id}`.
    pub fn key(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl From<i64> for SessionId {
    fn from(chat_id: i64) -> Self {
        Self(chat_id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to image bytes held by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self(file_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for ImageRef {
    fn from(file_id: String) -> Self {
        Self(file_id)
    }
}

impl From<&str> for ImageRef {
    fn from(file_id: &str) -> Self {
        Self(file_id.to_string())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
