use crate::store::{ConversationStore, PreferenceStore, SummaryStore};
use async_trait::async_trait;
use chrono::Utc;
use parley_core::{
    ContextSummary, ConversationTurn, NewSummary, NewTurn, ParleyError, ParleyResult, TurnId,
    UserId,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    next_turn_id: TurnId,
    next_summary_id: i64,
    turns: HashMap<UserId, Vec<ConversationTurn>>,
    summaries: HashMap<UserId, Vec<ContextSummary>>,
    preferences: HashMap<UserId, String>,
}

/// In-process store for turns, summaries and preferences.
///
/// Everything lives behind one lock, which makes compaction trivially atomic.
/// Data is lost on restart; use the SQLite store for durability.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append_turn(&self, turn: NewTurn) -> ParleyResult<ConversationTurn> {
        let mut inner = self.inner.write().await;
        inner.next_turn_id += 1;
        let stored = ConversationTurn {
            id: inner.next_turn_id,
            user_id: turn.user_id,
            role: turn.role,
            content: turn.content,
            provider_id: turn.provider_id,
            token_count: turn.token_count,
            timestamp: Utc::now(),
        };
        inner
            .turns
            .entry(turn.user_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn recent_turns(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> ParleyResult<Vec<ConversationTurn>> {
        let inner = self.inner.read().await;
        let turns = inner.turns.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }

    async fn oldest_turns(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> ParleyResult<Vec<ConversationTurn>> {
        let inner = self.inner.read().await;
        let turns = inner.turns.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(turns.iter().take(limit).cloned().collect())
    }

    async fn count_turns(&self, user_id: UserId) -> ParleyResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner.turns.get(&user_id).map_or(0, Vec::len))
    }

    async fn compact(
        &self,
        summary: NewSummary,
        expected_turns: usize,
    ) -> ParleyResult<Option<ContextSummary>> {
        if summary.covered_from > summary.covered_to {
            return Err(ParleyError::Session(format!(
                "Invalid summary range [{}, {}]",
                summary.covered_from, summary.covered_to
            )));
        }

        let mut inner = self.inner.write().await;
        let in_range = |t: &ConversationTurn| {
            t.id >= summary.covered_from && t.id <= summary.covered_to
        };

        let covered = inner
            .turns
            .get(&summary.user_id)
            .map_or(0, |turns| turns.iter().filter(|t| in_range(t)).count());
        if covered != expected_turns {
            return Ok(None);
        }

        if let Some(turns) = inner.turns.get_mut(&summary.user_id) {
            turns.retain(|t| !in_range(t));
        }

        inner.next_summary_id += 1;
        let stored = ContextSummary {
            id: inner.next_summary_id,
            user_id: summary.user_id,
            summary_text: summary.summary_text,
            covered_from: summary.covered_from,
            covered_to: summary.covered_to,
            estimated_tokens_saved: summary.estimated_tokens_saved,
            created_at: Utc::now(),
        };
        inner
            .summaries
            .entry(summary.user_id)
            .or_default()
            .push(stored.clone());
        Ok(Some(stored))
    }

    async fn clear_history(&self, user_id: UserId) -> ParleyResult<usize> {
        let mut inner = self.inner.write().await;
        inner.summaries.remove(&user_id);
        Ok(inner.turns.remove(&user_id).map_or(0, |t| t.len()))
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn summaries(&self, user_id: UserId) -> ParleyResult<Vec<ContextSummary>> {
        let inner = self.inner.read().await;
        Ok(inner.summaries.get(&user_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_preference(&self, user_id: UserId) -> ParleyResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.preferences.get(&user_id).cloned())
    }

    async fn set_preference(&self, user_id: UserId, provider_id: &str) -> ParleyResult<()> {
        let mut inner = self.inner.write().await;
        inner.preferences.insert(user_id, provider_id.to_string());
        Ok(())
    }
}
