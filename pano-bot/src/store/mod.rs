//! Session store: a TTL-capable list per session.
//!
//! The store only offers the four primitives the orchestrator needs:
//! prepend, read everything, arm expiration, delete. Backends:
//!
//! - **In-Memory**: local runs and tests
//! - **Redis**: production (`LPUSH` / `LRANGE` / `EXPIRE` / `DEL`)

mod memory;
mod redis;

pub use self::memory::InMemorySessionStore;
pub use self::redis::RedisSessionStore;

use crate::session::{ImageRef, SessionId};
use async_trait::async_trait;
use thiserror::Error;

/// Session store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection error to the backend.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a command.
    #[error("Command failed: {0}")]
    Command(String),

    /// Backend not available (closed or never opened).
    #[error("Backend not available: {0}")]
    Unavailable(String),
}

impl From<StoreError> for pano_common::Error {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for per-session image reference lists.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Prepend `image` and return the new list length.
    async fn push(&self, session: SessionId, image: &ImageRef) -> StoreResult<usize>;

    /// All references, most recently pushed first. Empty when absent.
    async fn read_all(&self, session: SessionId) -> StoreResult<Vec<ImageRef>>;

    /// Expire the session `seconds` from now. No-op for an absent session.
    async fn set_expire(&self, session: SessionId, seconds: u64) -> StoreResult<()>;

    /// Remove the session. Idempotent.
    async fn delete(&self, session: SessionId) -> StoreResult<()>;

    /// Check whether the backend answers.
    async fn is_healthy(&self) -> bool {
        true
    }
}
