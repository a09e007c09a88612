use crate::backends::LlmBackend;
use parley_core::{ChatMessage, ConversationTurn, NewSummary, NewTurn, ParleyResult, Role, UserId};
use parley_session::ChatStore;
use std::sync::Arc;
use tracing::{info, warn};

const SUMMARY_PROMPT: &str = "Compress the following dialogue into a short summary \
(2-4 sentences). Keep the key facts, decisions and context. Write in the same \
language as the dialogue. Reply with the summary only, no preamble.\n\n";

const SUMMARY_HEADER: &str = "[Summary of previous dialogue]";
const SUMMARY_ACK: &str = "Understood, I will take the previous dialogue into account.";

/// Snapshot shown by the `/context` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    pub total_turns: usize,
    /// Turns that will be sent with the next request.
    pub context_window: usize,
    pub summaries: usize,
    pub tokens_saved: u64,
}

/// Outcome of one compaction cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compaction {
    /// Not enough turns to compact.
    NotNeeded,
    /// A summary replaced `turns` turns.
    Compacted { turns: usize, tokens_saved: u64 },
    /// Nothing was written (empty summary or the range changed underneath).
    Skipped,
}

/// Builds the message list sent to a backend and keeps history bounded.
///
/// The window holds the most recent `window_size` turns. Once more than
/// twice that many are stored, the oldest excess is summarized by one
/// backend call and atomically replaced by a single summary.
pub struct ContextAssembler {
    store: Arc<dyn ChatStore>,
    window_size: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn ChatStore>, window_size: usize) -> Self {
        Self {
            store,
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Assemble summaries plus the recent window, oldest first.
    ///
    /// With a `summarizer`, a due compaction runs after the context is read;
    /// its failure is logged and never affects the returned context.
    pub async fn build_context(
        &self,
        user_id: UserId,
        summarizer: Option<&dyn LlmBackend>,
    ) -> ParleyResult<Vec<ChatMessage>> {
        let mut messages = Vec::new();

        let summaries = self.store.summaries(user_id).await?;
        if !summaries.is_empty() {
            let joined = summaries
                .iter()
                .map(|s| s.summary_text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(ChatMessage::user(format!("{SUMMARY_HEADER}\n{joined}")));
            messages.push(ChatMessage::assistant(SUMMARY_ACK));
        }

        let recent = self.store.recent_turns(user_id, self.window_size).await?;
        messages.extend(recent.iter().map(ConversationTurn::to_chat_message));

        if let Some(summarizer) = summarizer {
            if let Err(e) = self.compact_if_needed(user_id, summarizer).await {
                warn!(user_id, error = %e, "Context compaction failed");
            }
        }

        Ok(messages)
    }

    /// Run one compaction cycle if more than twice the window is stored.
    pub async fn compact_if_needed(
        &self,
        user_id: UserId,
        summarizer: &dyn LlmBackend,
    ) -> ParleyResult<Compaction> {
        let total = self.store.count_turns(user_id).await?;
        if total <= self.window_size * 2 {
            return Ok(Compaction::NotNeeded);
        }

        let oldest = self
            .store
            .oldest_turns(user_id, total - self.window_size)
            .await?;
        let (Some(first), Some(last)) = (oldest.first(), oldest.last()) else {
            return Ok(Compaction::NotNeeded);
        };

        let transcript = render_transcript(&oldest);
        let prompt = format!("{SUMMARY_PROMPT}{transcript}");
        let generation = summarizer
            .generate(None, &[ChatMessage::user(prompt)])
            .await?;

        let summary_text = generation.text.trim();
        if summary_text.is_empty() {
            warn!(user_id, "Summarizer returned empty text, skipping compaction");
            return Ok(Compaction::Skipped);
        }

        let tokens_saved = (transcript.chars().count() / 4) as u64;
        let stored = self
            .store
            .compact(
                NewSummary {
                    user_id,
                    summary_text: summary_text.to_string(),
                    covered_from: first.id,
                    covered_to: last.id,
                    estimated_tokens_saved: tokens_saved,
                },
                oldest.len(),
            )
            .await?;

        match stored {
            Some(_) => {
                info!(user_id, turns = oldest.len(), tokens_saved, "Compacted conversation");
                Ok(Compaction::Compacted {
                    turns: oldest.len(),
                    tokens_saved,
                })
            }
            None => {
                warn!(user_id, "Turn range changed during compaction, skipping");
                Ok(Compaction::Skipped)
            }
        }
    }

    pub async fn record_turn(
        &self,
        user_id: UserId,
        role: Role,
        content: impl Into<String>,
        provider_id: Option<&str>,
        token_count: Option<u64>,
    ) -> ParleyResult<ConversationTurn> {
        let turn = NewTurn {
            user_id,
            role,
            content: content.into(),
            provider_id: provider_id.map(str::to_string),
            token_count,
        };
        self.store.append_turn(turn).await
    }

    /// Delete all turns and summaries. Returns the number of turns deleted.
    pub async fn clear_history(&self, user_id: UserId) -> ParleyResult<usize> {
        self.store.clear_history(user_id).await
    }

    pub async fn stats(&self, user_id: UserId) -> ParleyResult<ContextStats> {
        let total_turns = self.store.count_turns(user_id).await?;
        let summaries = self.store.summaries(user_id).await?;
        Ok(ContextStats {
            total_turns,
            context_window: total_turns.min(self.window_size),
            summaries: summaries.len(),
            tokens_saved: summaries.iter().map(|s| s.estimated_tokens_saved).sum(),
        })
    }
}

/// `User: …` / `Assistant: …` lines, one per turn.
fn render_transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| {
            let label = match t.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{label}: {}", t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backends::GenerationStream;
    use async_trait::async_trait;
    use parley_core::{Generation, ParleyError};
    use parley_session::{ConversationStore, MemoryStore, SummaryStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSummarizer {
        reply: &'static str,
        calls: AtomicU32,
        last_prompt: tokio::sync::Mutex<String>,
    }

    impl FixedSummarizer {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                calls: AtomicU32::new(0),
                last_prompt: tokio::sync::Mutex::new(String::new()),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for FixedSummarizer {
        fn provider_id(&self) -> &str {
            "mock"
        }

        fn model_id(&self) -> &str {
            "mock-1"
        }

        async fn generate(
            &self,
            _system_prompt: Option<&str>,
            messages: &[ChatMessage],
        ) -> ParleyResult<Generation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().await = messages[0].content.clone();
            Ok(Generation::new("mock", "mock-1", self.reply, None))
        }

        async fn generate_stream(
            &self,
            _system_prompt: Option<&str>,
            _messages: &[ChatMessage],
        ) -> ParleyResult<GenerationStream> {
            Err(ParleyError::fatal("mock", "not used"))
        }

        async fn generate_with_image(
            &self,
            _image: &[u8],
            _mime_type: &str,
            _prompt: &str,
            _system_prompt: Option<&str>,
        ) -> ParleyResult<Generation> {
            Err(ParleyError::fatal("mock", "not used"))
        }
    }

    async fn seed(assembler: &ContextAssembler, user_id: UserId, n: usize) {
        for i in 0..n {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assembler
                .record_turn(user_id, role, format!("turn {i}"), None, None)
                .await
                .unwrap();
        }
    }

    // ── Test 1: T turns, window N, T > 2N ────────────────────────────────

    #[tokio::test]
    async fn compaction_covers_exact_prefix() {
        let store = Arc::new(MemoryStore::new());
        let assembler = ContextAssembler::new(store.clone(), 3);
        seed(&assembler, 1, 7).await;
        let summarizer = FixedSummarizer::new("earlier talk");

        let outcome = assembler.compact_if_needed(1, &summarizer).await.unwrap();
        assert!(matches!(outcome, Compaction::Compacted { turns: 4, .. }));

        let summaries = store.summaries(1).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!((summaries[0].covered_from, summaries[0].covered_to), (1, 4));

        let remaining = store.recent_turns(1, 100).await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().all(|t| !summaries[0].covers(t.id)));

        let prompt = summarizer.last_prompt.lock().await.clone();
        assert!(prompt.contains("User: turn 0\nAssistant: turn 1"));
        assert!(!prompt.contains("turn 4"));
    }

    // ── Test 2: threshold is strictly greater than 2N ────────────────────

    #[tokio::test]
    async fn no_compaction_at_threshold() {
        let store = Arc::new(MemoryStore::new());
        let assembler = ContextAssembler::new(store, 3);
        seed(&assembler, 1, 6).await;
        let summarizer = FixedSummarizer::new("s");

        let outcome = assembler.compact_if_needed(1, &summarizer).await.unwrap();
        assert_eq!(outcome, Compaction::NotNeeded);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    // ── Test 3: summaries are prepended as a synthetic pair ──────────────

    #[tokio::test]
    async fn context_prepends_summary_pair() {
        let store = Arc::new(MemoryStore::new());
        let assembler = ContextAssembler::new(store, 2);
        seed(&assembler, 1, 5).await;
        let summarizer = FixedSummarizer::new("they greeted each other");

        // First call returns the pre-compaction view and compacts afterwards.
        let before = assembler.build_context(1, Some(&summarizer)).await.unwrap();
        assert_eq!(before.len(), 2);

        let after = assembler.build_context(1, None).await.unwrap();
        assert_eq!(after.len(), 4);
        assert_eq!(after[0].role, Role::User);
        assert!(after[0].content.starts_with(SUMMARY_HEADER));
        assert!(after[0].content.ends_with("they greeted each other"));
        assert_eq!(after[1].role, Role::Assistant);
        assert_eq!(after[2].content, "turn 3");
        assert_eq!(after[3].content, "turn 4");
    }

    // ── Test 4: empty summary skips the cycle ────────────────────────────

    #[tokio::test]
    async fn empty_summary_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let assembler = ContextAssembler::new(store.clone(), 1);
        seed(&assembler, 1, 3).await;

        let outcome = assembler
            .compact_if_needed(1, &FixedSummarizer::new("   "))
            .await
            .unwrap();
        assert_eq!(outcome, Compaction::Skipped);
        assert_eq!(store.count_turns(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn stats_and_clear() {
        let store = Arc::new(MemoryStore::new());
        let assembler = ContextAssembler::new(store, 2);
        seed(&assembler, 1, 5).await;
        assembler
            .compact_if_needed(1, &FixedSummarizer::new("s"))
            .await
            .unwrap();

        let stats = assembler.stats(1).await.unwrap();
        assert_eq!(stats.total_turns, 2);
        assert_eq!(stats.context_window, 2);
        assert_eq!(stats.summaries, 1);
        assert!(stats.tokens_saved > 0);

        assert_eq!(assembler.clear_history(1).await.unwrap(), 2);
        assert_eq!(assembler.stats(1).await.unwrap().summaries, 0);
    }
}
