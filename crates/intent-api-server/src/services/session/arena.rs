use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::types::{Message, Role};

const DEFAULT_MAX_POOLED: usize = 64;

/// Pool of `Message` records. Appends take a record from here and move it
/// into the history; `ConversationContext::clear` hands records back.
///
/// Purely an allocation optimization: `acquire` falls back to a fresh record
/// when the pool is empty and `release` drops records beyond `max_pooled`.
pub(crate) struct MessageArena {
    pool: Mutex<Vec<Message>>,
    max_pooled: usize,
}

impl MessageArena {
    pub(crate) fn new() -> Self {
        Self::with_max_pooled(DEFAULT_MAX_POOLED)
    }

    pub(crate) fn with_max_pooled(max_pooled: usize) -> Self {
        Self {
            pool: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
        }
    }

    pub(crate) fn acquire(&self) -> Message {
        self.pool.lock().pop().unwrap_or_default()
    }

    /// Zero every field and hand the record back. String capacity is kept.
    pub(crate) fn release(&self, mut msg: Message) {
        msg.timestamp = DateTime::<Utc>::default();
        msg.role = Role::default();
        msg.content.clear();

        let mut pool = self.pool.lock();
        if pool.len() < self.max_pooled {
            pool.push(msg);
        }
    }

    #[cfg(test)]
    pub(crate) fn pooled(&self) -> usize {
        self.pool.lock().len()
    }
}
