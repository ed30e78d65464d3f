use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::arena::MessageArena;
use super::types::{Message, Role};

/// Point-in-time copy of a context's bookkeeping fields.
#[derive(Debug, Clone, Serialize)]
pub struct ContextMetadata {
    pub session_id: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub properties: HashMap<String, Value>,
}

#[derive(Debug)]
struct ContextState {
    messages: Vec<Message>,
    properties: HashMap<String, Value>,
    last_updated: DateTime<Utc>,
}

impl ContextState {
    /// `last_updated` must strictly increase even if the wall clock stalls
    /// or steps backwards.
    fn touch(&mut self) {
        let now = Utc::now();
        self.last_updated = if now > self.last_updated {
            now
        } else {
            self.last_updated + Duration::nanoseconds(1)
        };
    }
}

/// Conversation state for one session.
///
/// Every accessor returns owned copies, so callers never hold the lock while
/// they work with the data (in particular across the classifier call).
pub struct ConversationContext {
    session_id: String,
    created: DateTime<Utc>,
    state: RwLock<ContextState>,
    arena: Arc<MessageArena>,
    /// Held for a whole request when conversation turns are serialized.
    turn_lock: tokio::sync::Mutex<()>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_arena(session_id, Arc::new(MessageArena::new()))
    }

    pub(crate) fn with_arena(session_id: impl Into<String>, arena: Arc<MessageArena>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created: now,
            state: RwLock::new(ContextState {
                messages: Vec::new(),
                properties: HashMap::new(),
                last_updated: now,
            }),
            arena,
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn add_message(&self, role: Role, content: impl AsRef<str>) {
        let content = content.as_ref();
        let mut msg = self.arena.acquire();
        msg.timestamp = Utc::now();
        msg.role = role;
        msg.content.push_str(content);

        {
            let mut state = self.state.write();
            state.messages.push(msg);
            state.touch();
        }

        debug!(
            session_id = %self.session_id,
            role = %role,
            content_len = content.len(),
            "Message appended"
        );
    }

    /// Put a system message at the front of the history unless it already
    /// opens with one. Returns true when a message was added.
    pub fn ensure_system_message(&self, content: impl AsRef<str>) -> bool {
        let mut state = self.state.write();
        if matches!(state.messages.first(), Some(m) if m.role == Role::System) {
            return false;
        }
        state.messages.insert(0, Message::system(content.as_ref()));
        state.touch();
        true
    }

    /// Independent copy of the history.
    pub fn messages(&self) -> Vec<Message> {
        self.state.read().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.state.read().messages.len()
    }

    pub fn metadata(&self) -> ContextMetadata {
        let state = self.state.read();
        ContextMetadata {
            session_id: self.session_id.clone(),
            created: self.created,
            last_updated: state.last_updated,
            properties: state.properties.clone(),
        }
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let mut state = self.state.write();
        debug!(session_id = %self.session_id, key = %key, "Setting property");
        state.properties.insert(key, value.into());
        state.touch();
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.state.read().properties.get(key).cloned()
    }

    /// Empty history and properties in place; allocations are kept and the
    /// dropped messages go back to the arena for reuse.
    pub fn clear(&self) {
        let drained: Vec<Message> = {
            let mut state = self.state.write();
            state.properties.clear();
            state.touch();
            state.messages.drain(..).collect()
        };
        for msg in drained {
            self.arena.release(msg);
        }
    }

    pub fn turn_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.turn_lock
    }
}

impl std::fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContext")
            .field("session_id", &self.session_id)
            .field("created", &self.created)
            .field("messages", &self.message_count())
            .finish()
    }
}
