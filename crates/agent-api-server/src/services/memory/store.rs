use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::{Memory, MemorySnapshot};

/// Shared handle to one session's memory. Holding the lock serializes requests
/// for that session.
pub type SessionHandle = Arc<Mutex<Memory>>;

/// Session id → memory mapping.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Existing memory for the session, or a fresh one with the configured budget.
    async fn get_or_create(&self, session_id: &str) -> SessionHandle;

    /// Read-only snapshot; empty defaults when the session is unknown.
    ///
    /// Waits for any request currently holding the session lock, so the snapshot
    /// reflects the last committed exchange.
    async fn load(&self, session_id: &str) -> MemorySnapshot;

    /// Remove the session. Returns whether anything was removed.
    async fn clear(&self, session_id: &str) -> bool;

    /// Drop idle sessions that no request is holding, returning how many were removed.
    fn cleanup_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct SessionEntry {
    memory: SessionHandle,
    last_access: Instant,
}

impl SessionEntry {
    fn new(token_budget: usize) -> Self {
        Self {
            memory: Arc::new(Mutex::new(Memory::new(token_budget))),
            last_access: Instant::now(),
        }
    }

    /// A handle cloned out by `get_or_create` is still alive.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.memory) > 1
    }

    /// Idle past `ttl` and not held by any request.
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_access) > ttl && !self.in_use()
    }
}

/// Process-local store backed by DashMap.
///
/// Sessions expire after `idle_ttl` without access (checked lazily and by
/// [`SessionStore::cleanup_expired`]); once `max_sessions` is reached the least
/// recently used session is evicted to make room. A session whose handle is still
/// held by a running request is never expired or evicted.
pub struct InMemorySessionStore {
    entries: DashMap<String, SessionEntry>,
    token_budget: usize,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl InMemorySessionStore {
    pub fn new(token_budget: usize, idle_ttl: Duration, max_sessions: usize) -> Self {
        info!(
            "Initializing session store: budget={} tokens, ttl={:?}, max_sessions={}",
            token_budget, idle_ttl, max_sessions
        );
        Self {
            entries: DashMap::new(),
            token_budget,
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .entries
            .iter()
            .filter(|entry| !entry.value().in_use())
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| entry.key().clone());

        if let Some(session_id) = oldest {
            self.entries.remove(&session_id);
            debug!("Session store full, evicted least recent session {}", session_id);
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: &str) -> SessionHandle {
        if !self.entries.contains_key(session_id) && self.entries.len() >= self.max_sessions {
            self.evict_least_recent();
        }

        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Created memory for session {}", session_id);
                SessionEntry::new(self.token_budget)
            });

        if entry.is_expired(now, self.idle_ttl) {
            debug!("Session {} expired, starting fresh memory", session_id);
            *entry = SessionEntry::new(self.token_budget);
        }
        entry.last_access = now;
        entry.memory.clone()
    }

    async fn load(&self, session_id: &str) -> MemorySnapshot {
        let handle = match self.entries.get(session_id) {
            Some(entry) if !entry.is_expired(Instant::now(), self.idle_ttl) => entry.memory.clone(),
            _ => return MemorySnapshot::default(),
        };

        let memory = handle.lock().await;
        memory.snapshot()
    }

    async fn clear(&self, session_id: &str) -> bool {
        let removed = self.entries.remove(session_id).is_some();
        if removed {
            debug!("Cleared memory for session {}", session_id);
        }
        removed
    }

    fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, self.idle_ttl));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
