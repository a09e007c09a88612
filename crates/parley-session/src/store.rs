use async_trait::async_trait;
use parley_core::{ContextSummary, ConversationTurn, NewSummary, NewTurn, ParleyResult, UserId};

/// Append-only log of conversation turns, per user.
///
/// Turn ids are assigned by the store and strictly increase; an id is never
/// reused, even after the turn is deleted by compaction.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a turn and return it with its assigned id and timestamp.
    async fn append_turn(&self, turn: NewTurn) -> ParleyResult<ConversationTurn>;

    /// The most recent `limit` turns, oldest first.
    async fn recent_turns(&self, user_id: UserId, limit: usize)
        -> ParleyResult<Vec<ConversationTurn>>;

    /// The oldest `limit` turns, oldest first.
    async fn oldest_turns(&self, user_id: UserId, limit: usize)
        -> ParleyResult<Vec<ConversationTurn>>;

    /// Number of stored turns for the user.
    async fn count_turns(&self, user_id: UserId) -> ParleyResult<usize>;

    /// Atomically insert `summary` and delete the turns it covers.
    ///
    /// The covered range must still contain exactly `expected_turns` turns;
    /// otherwise nothing is written and `Ok(None)` is returned, so a caller
    /// racing with another writer skips the cycle instead of losing or
    /// duplicating history.
    async fn compact(
        &self,
        summary: NewSummary,
        expected_turns: usize,
    ) -> ParleyResult<Option<ContextSummary>>;

    /// Delete every turn and summary for the user. Returns the number of
    /// turns deleted.
    async fn clear_history(&self, user_id: UserId) -> ParleyResult<usize>;
}

/// Read side of the summaries produced by [`ConversationStore::compact`].
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// All summaries for the user in ascending id order.
    async fn summaries(&self, user_id: UserId) -> ParleyResult<Vec<ContextSummary>>;
}

/// Durable tier of the per-user provider preference.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// The stored provider id, if any.
    async fn get_preference(&self, user_id: UserId) -> ParleyResult<Option<String>>;

    /// Store (insert or overwrite) the provider id.
    async fn set_preference(&self, user_id: UserId, provider_id: &str) -> ParleyResult<()>;
}

/// Convenience bound for a backend that implements every store trait.
pub trait ChatStore: ConversationStore + SummaryStore + PreferenceStore {}

impl<T: ConversationStore + SummaryStore + PreferenceStore> ChatStore for T {}
