//! In-memory conversation state.
//!
//! - `ConversationContext`: one lock-protected transcript + property bag per session
//! - `SessionStore`: authoritative session map fronted by a bounded recency cache
//! - `MessageArena`: scratch-record pool used while appending messages
//!
//! Sessions live only as long as the process.

mod arena;
mod context;
mod recency;
mod store;
pub mod types;

pub use context::{ContextMetadata, ConversationContext};
pub use store::{SessionStore, SessionStoreStats, StoreFull};
pub use types::{Message, Role};
