//! In-memory session store.

use super::{SessionStore, StoreResult};
use crate::session::{ImageRef, SessionId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Entry {
    refs: VecDeque<ImageRef>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local store with lazy expiration.
///
/// Mirrors the Redis semantics used by the bot: pushing to an expired or
/// absent session starts a fresh list without a TTL, `set_expire` on an
/// absent session does nothing.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `session` expires, `None` if absent or without TTL.
    pub async fn expires_in(&self, session: SessionId) -> Option<Duration> {
        let now = Instant::now();
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&session).filter(|e| !e.is_expired(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        let now = Instant::now();
        let sessions = self.sessions.read().await;
        sessions.values().filter(|e| !e.is_expired(now)).count()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn push(&self, session: SessionId, image: &ImageRef) -> StoreResult<usize> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let entry = sessions.entry(session).or_default();
        if entry.is_expired(now) {
            *entry = Entry::default();
        }
        entry.refs.push_front(image.clone());

        Ok(entry.refs.len())
    }

    async fn read_all(&self, session: SessionId) -> StoreResult<Vec<ImageRef>> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        match sessions.get(&session) {
            Some(entry) if entry.is_expired(now) => {
                sessions.remove(&session);
                Ok(Vec::new())
            }
            Some(entry) => Ok(entry.refs.iter().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn set_expire(&self, session: SessionId, seconds: u64) -> StoreResult<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let expired = match sessions.get_mut(&session) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + Duration::from_secs(seconds));
                false
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            sessions.remove(&session);
        }

        Ok(())
    }

    async fn delete(&self, session: SessionId) -> StoreResult<()> {
        self.sessions.write().await.remove(&session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SessionId = SessionId::new(42);

    #[tokio::test]
    async fn test_push_prepends_and_counts() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.push(S, &"a".into()).await.unwrap(), 1);
        assert_eq!(store.push(S, &"b".into()).await.unwrap(), 2);
        assert_eq!(store.push(S, &"c".into()).await.unwrap(), 3);

        let refs = store.read_all(S).await.unwrap();
        let expected: Vec<ImageRef> = vec!["c".into(), "b".into(), "a".into()];
        assert_eq!(refs, expected);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemorySessionStore::new();
        store.push(S, &"a".into()).await.unwrap();
        store.push(SessionId::new(7), &"x".into()).await.unwrap();

        store.delete(S).await.unwrap();
        assert!(store.read_all(S).await.unwrap().is_empty());
        assert_eq!(store.read_all(SessionId::new(7)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let store = InMemorySessionStore::new();
        store.delete(S).await.unwrap();
        store.delete(S).await.unwrap();
        assert!(store.read_all(S).await.unwrap().is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_set_expire_on_absent_session_does_not_create_it() {
        let store = InMemorySessionStore::new();
        store.set_expire(S, 3600).await.unwrap();
        assert_eq!(store.session_count().await, 0);
        assert!(store.expires_in(S).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_after_ttl() {
        let store = InMemorySessionStore::new();
        store.push(S, &"a".into()).await.unwrap();
        store.set_expire(S, 3600).await.unwrap();

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(store.read_all(S).await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.read_all(S).await.unwrap().is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_is_sliding() {
        let store = InMemorySessionStore::new();
        store.push(S, &"a".into()).await.unwrap();
        store.set_expire(S, 3600).await.unwrap();

        tokio::time::advance(Duration::from_secs(1800)).await;
        store.push(S, &"b".into()).await.unwrap();
        store.set_expire(S, 3600).await.unwrap();
        assert_eq!(store.expires_in(S).await, Some(Duration::from_secs(3600)));

        // Past the first deadline (T+3600) but before the second (T+5400).
        tokio::time::advance(Duration::from_secs(2000)).await;
        assert_eq!(store.read_all(S).await.unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(1600)).await;
        assert!(store.read_all(S).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_after_expiry_starts_fresh() {
        let store = InMemorySessionStore::new();
        store.push(S, &"old".into()).await.unwrap();
        store.set_expire(S, 10).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.push(S, &"new".into()).await.unwrap(), 1);
        assert_eq!(store.read_all(S).await.unwrap(), vec![ImageRef::from("new")]);
        assert!(store.expires_in(S).await.is_none());
    }
}
