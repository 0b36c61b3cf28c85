use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::ChatTurn;
use crate::session::SessionKey;

pub const DEFAULT_MAX_TURNS: usize = 20;
const DEFAULT_REDIS_KEY_PREFIX: &str = "listing-assistant:chat-memory:v1";
const DEFAULT_REDIS_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const APPENDS_PER_SWEEP: u64 = 256;

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("chat memory backend failure: {0}")]
    Backend(String),
    #[error("chat memory payload is invalid: {0}")]
    InvalidPayload(String),
}

pub type MemoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MemoryStoreError>> + Send + 'a>>;

/// Bounded per-session window of chat turns, oldest evicted first.
pub trait ChatMemoryStore: Send + Sync {
    fn append<'a>(&'a self, session: &'a SessionKey, turn: ChatTurn) -> MemoryFuture<'a, ()>;

    /// Returns up to `limit` most recent turns, oldest first.
    fn recent<'a>(
        &'a self,
        session: &'a SessionKey,
        limit: usize,
    ) -> MemoryFuture<'a, Vec<ChatTurn>>;

    fn clear<'a>(&'a self, session: &'a SessionKey) -> MemoryFuture<'a, ()>;
}

#[derive(Debug)]
struct SessionTurns {
    turns: VecDeque<ChatTurn>,
    last_touched: Instant,
}

/// Process-local window. Sessions idle longer than the TTL are dropped by `prune_idle`,
/// which also runs every few hundred appends when no pruner task is running.
#[derive(Debug)]
pub struct InMemoryChatMemoryStore {
    max_turns: usize,
    idle_ttl: Duration,
    sessions: DashMap<SessionKey, SessionTurns>,
    appends: AtomicU64,
}

impl Default for InMemoryChatMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl InMemoryChatMemoryStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            idle_ttl: DEFAULT_IDLE_TTL,
            sessions: DashMap::new(),
            appends: AtomicU64::new(0),
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn prune_idle(&self, now: Instant) {
        self.sessions.retain(|_, session| {
            now.saturating_duration_since(session.last_touched) < self.idle_ttl
        });
    }

    pub fn spawn_pruner(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.prune_idle(Instant::now());
            }
        })
    }

    fn append_at(&self, session: &SessionKey, turn: ChatTurn, now: Instant) {
        if (self.appends.fetch_add(1, Ordering::Relaxed) + 1) % APPENDS_PER_SWEEP == 0 {
            self.prune_idle(now);
        }

        let mut entry = self
            .sessions
            .entry(session.clone())
            .or_insert_with(|| SessionTurns {
                turns: VecDeque::new(),
                last_touched: now,
            });
        entry.last_touched = now;
        entry.turns.push_back(turn);
        while entry.turns.len() > self.max_turns {
            entry.turns.pop_front();
        }
    }
}

impl ChatMemoryStore for InMemoryChatMemoryStore {
    fn append<'a>(&'a self, session: &'a SessionKey, turn: ChatTurn) -> MemoryFuture<'a, ()> {
        Box::pin(async move {
            self.append_at(session, turn, Instant::now());
            Ok(())
        })
    }

    fn recent<'a>(
        &'a self,
        session: &'a SessionKey,
        limit: usize,
    ) -> MemoryFuture<'a, Vec<ChatTurn>> {
        Box::pin(async move {
            let Some(mut entry) = self.sessions.get_mut(session) else {
                return Ok(Vec::new());
            };
            entry.last_touched = Instant::now();
            let skip = entry.turns.len().saturating_sub(limit);
            Ok(entry.turns.iter().skip(skip).cloned().collect())
        })
    }

    fn clear<'a>(&'a self, session: &'a SessionKey) -> MemoryFuture<'a, ()> {
        Box::pin(async move {
            self.sessions.remove(session);
            Ok(())
        })
    }
}

/// Redis-backed window: one list per session, trimmed on every append and expired after a
/// day of inactivity.
#[derive(Clone)]
pub struct RedisChatMemoryStore {
    connection: ConnectionManager,
    key_prefix: String,
    max_turns: usize,
    ttl_seconds: i64,
}

impl RedisChatMemoryStore {
    pub async fn new(redis_url: &str, max_turns: usize) -> Result<Self, MemoryStoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| MemoryStoreError::Backend(err.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| MemoryStoreError::Backend(err.to_string()))?;

        let mut health_connection = connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut health_connection)
            .await
            .map_err(|err| MemoryStoreError::Backend(format!("failed to connect to redis: {err}")))?;

        Ok(Self {
            connection,
            key_prefix: DEFAULT_REDIS_KEY_PREFIX.to_string(),
            max_turns: max_turns.max(1),
            ttl_seconds: DEFAULT_REDIS_TTL_SECONDS,
        })
    }

    fn session_list_key(&self, session: &SessionKey) -> String {
        format!("{}:{}", self.key_prefix, hashed_label(session.as_str()))
    }
}

impl ChatMemoryStore for RedisChatMemoryStore {
    fn append<'a>(&'a self, session: &'a SessionKey, turn: ChatTurn) -> MemoryFuture<'a, ()> {
        Box::pin(async move {
            let payload = serde_json::to_string(&turn)
                .map_err(|err| MemoryStoreError::InvalidPayload(err.to_string()))?;
            let key = self.session_list_key(session);
            let keep_from = -isize::try_from(self.max_turns).unwrap_or(isize::MAX);

            let mut connection = self.connection.clone();
            let _: i64 = connection.rpush(&key, payload).await.map_err(backend_error)?;
            let _: () = connection
                .ltrim(&key, keep_from, -1)
                .await
                .map_err(backend_error)?;
            let _: bool = connection
                .expire(&key, self.ttl_seconds)
                .await
                .map_err(backend_error)?;
            Ok(())
        })
    }

    fn recent<'a>(
        &'a self,
        session: &'a SessionKey,
        limit: usize,
    ) -> MemoryFuture<'a, Vec<ChatTurn>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let start = -isize::try_from(limit).unwrap_or(isize::MAX);
            let mut connection = self.connection.clone();
            let raw: Vec<String> = connection
                .lrange(self.session_list_key(session), start, -1)
                .await
                .map_err(backend_error)?;

            raw.iter()
                .map(|entry| {
                    serde_json::from_str::<ChatTurn>(entry)
                        .map_err(|err| MemoryStoreError::InvalidPayload(err.to_string()))
                })
                .collect()
        })
    }

    fn clear<'a>(&'a self, session: &'a SessionKey) -> MemoryFuture<'a, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let _: i64 = connection
                .del(self.session_list_key(session))
                .await
                .map_err(backend_error)?;
            Ok(())
        })
    }
}

fn backend_error(err: redis::RedisError) -> MemoryStoreError {
    MemoryStoreError::Backend(err.to_string())
}

fn hashed_label(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::Utc;

    use super::{ChatMemoryStore, InMemoryChatMemoryStore};
    use crate::models::{ChatRole, ChatTurn};
    use crate::session::SessionKey;

    #[tokio::test]
    async fn window_evicts_oldest_turns() {
        let store = InMemoryChatMemoryStore::new(3);
        let session = SessionKey::from("s1");
        for index in 0..5 {
            store
                .append(&session, ChatTurn::user(format!("turn {index}"), Utc::now()))
                .await
                .expect("append should succeed");
        }

        let turns = store.recent(&session, 10).await.expect("recent should succeed");
        let texts = turns.iter().map(|turn| turn.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["turn 2", "turn 3", "turn 4"]);
    }

    #[tokio::test]
    async fn recent_returns_tail_oldest_first() {
        let store = InMemoryChatMemoryStore::default();
        let session = SessionKey::from("s1");
        store
            .append(&session, ChatTurn::user("hi", Utc::now()))
            .await
            .expect("append should succeed");
        store
            .append(&session, ChatTurn::assistant("hello", Utc::now()))
            .await
            .expect("append should succeed");
        store
            .append(&session, ChatTurn::user("find condos", Utc::now()))
            .await
            .expect("append should succeed");

        let turns = store.recent(&session, 2).await.expect("recent should succeed");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, ChatRole::Assistant);
        assert_eq!(turns[1].text, "find condos");
    }

    #[tokio::test]
    async fn sessions_are_isolated_and_clearable() {
        let store = InMemoryChatMemoryStore::default();
        let first = SessionKey::from("a");
        let second = SessionKey::from("b");
        store
            .append(&first, ChatTurn::user("one", Utc::now()))
            .await
            .expect("append should succeed");

        assert!(store.recent(&second, 5).await.expect("recent").is_empty());

        store.clear(&first).await.expect("clear should succeed");
        assert!(store.recent(&first, 5).await.expect("recent").is_empty());
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn idle_sessions_are_pruned() {
        let store = InMemoryChatMemoryStore::new(5).with_idle_ttl(Duration::from_secs(60));
        let start = Instant::now();
        let stale = SessionKey::from("session:anonymous-1");
        let active = SessionKey::from("session:anonymous-2");

        store.append_at(&stale, ChatTurn::user("hi", Utc::now()), start);
        store.append_at(&active, ChatTurn::user("hi", Utc::now()), start);
        store.append_at(
            &active,
            ChatTurn::user("still here", Utc::now()),
            start + Duration::from_secs(45),
        );

        store.prune_idle(start + Duration::from_secs(30));
        assert_eq!(store.session_count(), 2);

        store.prune_idle(start + Duration::from_secs(61));
        assert_eq!(store.session_count(), 1);
        let turns = store.recent(&active, 5).await.expect("recent should succeed");
        assert_eq!(turns.len(), 2);
        assert!(store.recent(&stale, 5).await.expect("recent").is_empty());
    }

    #[test]
    fn appends_sweep_idle_sessions_without_a_pruner() {
        let store = InMemoryChatMemoryStore::new(2).with_idle_ttl(Duration::from_secs(60));
        let start = Instant::now();
        store.append_at(&SessionKey::from("session:stale"), ChatTurn::user("hi", Utc::now()), start);

        let later = start + Duration::from_secs(120);
        let active = SessionKey::from("session:active");
        for _ in 1..super::APPENDS_PER_SWEEP {
            store.append_at(&active, ChatTurn::user("again", Utc::now()), later);
        }

        assert_eq!(store.session_count(), 1);
    }
}
