use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::arena::MessageArena;
use super::context::ConversationContext;
use super::recency::RecencyCache;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Returned by [`SessionStore::try_get_context`] when a new session would
/// exceed the configured `max_sessions`.
#[derive(Debug, Clone, Error)]
#[error("session store is full ({limit} sessions)")]
pub struct StoreFull {
    pub limit: usize,
}

/// Session directory: one [`ConversationContext`] per session id.
///
/// `contexts` is authoritative and only grows. `cache` is a bounded LRU over
/// the same `Arc`s; evicting from it never drops a session. Lock order is
/// always `contexts` then `cache`, and the cache is only written while
/// `contexts` is held, so every cached id is also in `contexts`.
pub struct SessionStore {
    contexts: RwLock<HashMap<String, Arc<ConversationContext>>>,
    cache: Mutex<RecencyCache<Arc<ConversationContext>>>,
    arena: Arc<MessageArena>,
    max_sessions: Option<usize>,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    map_hits: AtomicU64,
    created: AtomicU64,
    evictions: AtomicU64,
}

/// Store statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct SessionStoreStats {
    pub sessions: usize,
    pub cached: usize,
    pub cache_capacity: usize,
    pub max_sessions: Option<usize>,
    pub cache_hits: u64,
    pub map_hits: u64,
    pub created: u64,
    pub evictions: u64,
}

impl SessionStore {
    pub fn new(cache_capacity: usize) -> Self {
        info!(
            "Initializing session store (recency cache capacity: {})",
            cache_capacity
        );
        Self {
            contexts: RwLock::new(HashMap::new()),
            cache: Mutex::new(RecencyCache::new(cache_capacity)),
            arena: Arc::new(MessageArena::new()),
            max_sessions: None,
            counters: Counters::default(),
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: Option<usize>) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Shared context for `session_id`, created on first reference.
    pub fn get_context(&self, session_id: &str) -> Arc<ConversationContext> {
        if let Some(ctx) = self.lookup(session_id) {
            return ctx;
        }
        let mut contexts = self.contexts.write();
        self.get_or_insert(&mut contexts, session_id)
    }

    /// Like [`get_context`](Self::get_context), but refuses to create a new
    /// session once `max_sessions` is reached. Existing sessions are always
    /// returned.
    pub fn try_get_context(&self, session_id: &str) -> Result<Arc<ConversationContext>, StoreFull> {
        if let Some(ctx) = self.lookup(session_id) {
            return Ok(ctx);
        }
        let mut contexts = self.contexts.write();
        if let Some(limit) = self.max_sessions {
            if !contexts.contains_key(session_id) && contexts.len() >= limit {
                warn!(
                    "Session store full ({} sessions), rejecting new session {}",
                    limit, session_id
                );
                return Err(StoreFull { limit });
            }
        }
        Ok(self.get_or_insert(&mut contexts, session_id))
    }

    /// Read-locked fast path: recency cache, then the authoritative map.
    fn lookup(&self, session_id: &str) -> Option<Arc<ConversationContext>> {
        let contexts = self.contexts.read();
        if let Some(ctx) = self.cache.lock().get(session_id) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(ctx);
        }
        let ctx = contexts.get(session_id)?.clone();
        self.counters.map_hits.fetch_add(1, Ordering::Relaxed);
        self.promote(session_id, &ctx);
        debug!("Session {} promoted back into recency cache", session_id);
        Some(ctx)
    }

    /// Write-locked slow path.
    fn get_or_insert(
        &self,
        contexts: &mut HashMap<String, Arc<ConversationContext>>,
        session_id: &str,
    ) -> Arc<ConversationContext> {
        // Another request may have created it between the two locks.
        if let Some(ctx) = contexts.get(session_id) {
            let ctx = ctx.clone();
            self.promote(session_id, &ctx);
            return ctx;
        }

        let ctx = Arc::new(ConversationContext::with_arena(
            session_id,
            self.arena.clone(),
        ));
        contexts.insert(session_id.to_string(), ctx.clone());
        self.promote(session_id, &ctx);
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        info!(
            "Created session {} ({} sessions in memory)",
            session_id,
            contexts.len()
        );
        ctx
    }

    /// Check a context back in and refresh its recency. Idempotent.
    pub fn save_context(&self, ctx: &Arc<ConversationContext>) {
        let session_id = ctx.session_id();
        let mut contexts = self.contexts.write();
        contexts.insert(session_id.to_string(), ctx.clone());
        self.promote(session_id, ctx);
        debug!("Saved session {}", session_id);
    }

    /// Caller must hold `contexts` (read or write).
    fn promote(&self, session_id: &str, ctx: &Arc<ConversationContext>) {
        if let Some(evicted) = self.cache.lock().put(session_id, ctx.clone()) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Session {} evicted from recency cache", evicted);
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.contexts.read().contains_key(session_id)
    }

    pub fn is_cached(&self, session_id: &str) -> bool {
        let _contexts = self.contexts.read();
        self.cache.lock().contains(session_id)
    }

    /// Number of sessions in the authoritative map.
    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }

    pub fn stats(&self) -> SessionStoreStats {
        let contexts = self.contexts.read();
        let cache = self.cache.lock();
        SessionStoreStats {
            sessions: contexts.len(),
            cached: cache.len(),
            cache_capacity: cache.capacity(),
            max_sessions: self.max_sessions,
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            map_hits: self.counters.map_hits.load(Ordering::Relaxed),
            created: self.counters.created.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
