//! Redis-backed session store.

use super::{SessionStore, StoreError, StoreResult};
use crate::session::{ImageRef, SessionId};
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use pano_common::config::RedisConfig;
use std::time::Duration;
use tokio::sync::RwLock;

/// Session store over one Redis list per session.
///
/// The connection is opened by [`RedisSessionStore::connect`] and released by
/// [`RedisSessionStore::close`]; both are driven by the composition root.
pub struct RedisSessionStore {
    key_prefix: String,
    /// Connection manager (handles reconnection automatically).
    conn_manager: RwLock<Option<ConnectionManager>>,
}

impl RedisSessionStore {
    /// Open a connection manager to the configured server.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let client = ::redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let conn_manager = tokio::time::timeout(
            Duration::from_secs(config.timeout_secs),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            StoreError::Connection(format!(
                "timed out after {}s connecting to {}",
                config.timeout_secs, config.url
            ))
        })?
        .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(key_prefix = %config.key_prefix, "Connected to Redis session store");

        Ok(Self {
            key_prefix: config.key_prefix.clone(),
            conn_manager: RwLock::new(Some(conn_manager)),
        })
    }

    /// Drop the connection. Later calls fail with [`StoreError::Unavailable`].
    pub async fn close(&self) {
        let mut conn = self.conn_manager.write().await;
        if conn.take().is_some() {
            tracing::info!("Redis session store closed");
        }
    }

    fn key(&self, session: SessionId) -> String {
        session.key(&self.key_prefix)
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        self.conn_manager.read().await.clone().ok_or_else(|| {
            StoreError::Unavailable("Connection manager not available".to_string())
        })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn push(&self, session: SessionId, image: &ImageRef) -> StoreResult<usize> {
        let mut conn = self.connection().await?;

        let count = ::redis::cmd("LPUSH")
            .arg(self.key(session))
            .arg(image.as_str())
            .query_async::<usize>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        tracing::debug!(session_id = %session, count, "LPUSH");
        Ok(count)
    }

    async fn read_all(&self, session: SessionId) -> StoreResult<Vec<ImageRef>> {
        let mut conn = self.connection().await?;

        let refs = ::redis::cmd("LRANGE")
            .arg(self.key(session))
            .arg(0)
            .arg(-1)
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(refs.into_iter().map(ImageRef::from).collect())
    }

    async fn set_expire(&self, session: SessionId, seconds: u64) -> StoreResult<()> {
        let mut conn = self.connection().await?;

        ::redis::cmd("EXPIRE")
            .arg(self.key(session))
            .arg(seconds)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, session: SessionId) -> StoreResult<()> {
        let mut conn = self.connection().await?;

        ::redis::cmd("DEL")
            .arg(self.key(session))
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };

        match ::redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(response) => response == "PONG",
            Err(_) => false,
        }
    }
}

// ============================================================================
// Redis Integration Tests (requires running Redis server)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(prefix: &str) -> RedisConfig {
        RedisConfig {
            url: std::env::var("PANOBOT_TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string()),
            key_prefix: prefix.to_string(),
            timeout_secs: 1,
        }
    }

    /// Connect, or `None` when no Redis is reachable.
    async fn try_connect(prefix: &str) -> Option<RedisSessionStore> {
        let store = RedisSessionStore::connect(&test_config(prefix)).await.ok()?;
        store.is_healthy().await.then_some(store)
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1/0".to_string(),
            key_prefix: "t:".to_string(),
            timeout_secs: 1,
        };
        let result = RedisSessionStore::connect(&config).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            key_prefix: "t:".to_string(),
            timeout_secs: 1,
        };
        assert!(RedisSessionStore::connect(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_redis_push_read_delete() {
        let Some(store) = try_connect("panobot-test:rw:").await else {
            tracing::warn!("Skipping Redis test: Redis not available");
            return;
        };
        let session = SessionId::new(4242);
        store.delete(session).await.unwrap();

        assert_eq!(store.push(session, &"a".into()).await.unwrap(), 1);
        assert_eq!(store.push(session, &"b".into()).await.unwrap(), 2);
        store.set_expire(session, 60).await.unwrap();

        let refs = store.read_all(session).await.unwrap();
        assert_eq!(refs, vec![ImageRef::from("b"), ImageRef::from("a")]);

        store.delete(session).await.unwrap();
        store.delete(session).await.unwrap();
        assert!(store.read_all(session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redis_close_makes_store_unavailable() {
        let Some(store) = try_connect("panobot-test:close:").await else {
            tracing::warn!("Skipping Redis test: Redis not available");
            return;
        };

        store.close().await;
        assert!(!store.is_healthy().await);
        let err = store.read_all(SessionId::new(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
