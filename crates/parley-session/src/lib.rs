//! Storage and per-user session state for Parley.
//!
//! # Main types
//!
//! - [`ConversationStore`], [`SummaryStore`], [`PreferenceStore`] — persistence contracts.
//! - [`MemoryStore`] — in-process implementation of all three.
//! - `SqliteStore` — durable implementation (feature `sqlite`).
//! - [`SessionStore`] — volatile per-user state with a TTL.

/// In-memory store.
pub mod memory;
/// Per-user volatile state with expiry.
pub mod session;
/// SQLite store.
#[cfg(feature = "sqlite")]
pub mod sqlite;
/// Persistence traits.
pub mod store;

pub use memory::MemoryStore;
pub use session::SessionStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use store::{ChatStore, ConversationStore, PreferenceStore, SummaryStore};
