use crate::debate::{critique_prompt, summary_prompt};
use crate::types::{DebateSession, DebateState, DebateSummary, ProviderAnswer};
use futures_util::future::join_all;
use parley_agent::{ProviderEntry, ProviderRouter, UsageLedger};
use parley_core::{truncate_chars, ChatMessage, ParleyError, ParleyResult, UserId};
use parley_session::SessionStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const MAX_ERROR_DETAIL_CHARS: usize = 500;

/// Asks every configured provider at once and runs debates over the answers.
///
/// Calls are concurrent and fault-isolated: a failing provider yields an
/// `Error: …` section instead of failing the whole request. Debate sessions
/// live in a TTL [`SessionStore`], one per user.
pub struct MultiModelOrchestrator {
    router: Arc<ProviderRouter>,
    usage: Arc<UsageLedger>,
    debates: Arc<SessionStore<DebateSession>>,
    system_prompt: Option<String>,
}

impl MultiModelOrchestrator {
    pub fn new(
        router: Arc<ProviderRouter>,
        usage: Arc<UsageLedger>,
        debates: Arc<SessionStore<DebateSession>>,
    ) -> Self {
        Self {
            router,
            usage,
            debates,
            system_prompt: None,
        }
    }

    /// System prompt for fan-out calls. Debate rounds carry their own.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// One-shot call to every provider; returns once all have finished.
    pub async fn fan_out(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<Vec<ProviderAnswer>> {
        let providers = self.router.providers();
        if providers.is_empty() {
            return Err(ParleyError::Orchestrator("No providers available".into()));
        }

        let start = Instant::now();
        let answers = join_all(
            providers
                .iter()
                .map(|entry| self.ask(entry, system_prompt, messages)),
        )
        .await;

        info!(
            providers = answers.len(),
            failed = answers.iter().filter(|a| a.is_error()).count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Fan-out complete"
        );
        Ok(answers)
    }

    /// Fan a question out and open a debate session over the answers,
    /// replacing any earlier one.
    pub async fn ask_all(&self, user_id: UserId, question: &str) -> ParleyResult<Vec<ProviderAnswer>> {
        let messages = [ChatMessage::user(question)];
        let answers = self
            .fan_out(self.system_prompt.as_deref(), &messages)
            .await?;
        self.debates
            .insert(user_id, DebateSession::new(question, answers.clone()));
        Ok(answers)
    }

    pub fn debate_state(&self, user_id: UserId) -> DebateState {
        self.debates
            .get(user_id)
            .map_or(DebateState::Idle, |s| s.state())
    }

    /// Each provider critiques every other provider's latest output.
    ///
    /// The first round answers the initial answers; later rounds answer the
    /// previous critiques.
    pub async fn critique_round(&self, user_id: UserId) -> ParleyResult<Vec<ProviderAnswer>> {
        let session = self.debates.get(user_id).ok_or_else(no_debate)?;
        let latest = session.latest();

        let requests: Vec<(&ProviderEntry, [ChatMessage; 1])> = latest
            .iter()
            .filter_map(|answer| {
                let entry = self.router.entry(&answer.provider_id)?;
                let prompt = critique_prompt(&session.question, latest, &answer.provider_id);
                Some((entry, [ChatMessage::user(prompt)]))
            })
            .collect();
        if requests.is_empty() {
            return Err(no_debate());
        }

        let critiques = join_all(
            requests
                .iter()
                .map(|(entry, messages)| self.ask(entry, None, messages)),
        )
        .await;

        let updated = self.debates.update(user_id, |current| {
            // A newer "ask all" may have replaced the session meanwhile.
            if current.started_at == session.started_at {
                current.critiques = critiques.clone();
                current.rounds += 1;
            }
            current.rounds
        });
        info!(user_id, rounds = ?updated, "Debate round complete");
        Ok(critiques)
    }

    /// Synthesize the debate with the default provider and end the session.
    ///
    /// The session is cleared even when the synthesis call fails.
    pub async fn summarize(&self, user_id: UserId) -> ParleyResult<DebateSummary> {
        let session = self.debates.remove(user_id).ok_or_else(no_debate)?;
        if session.answers.is_empty() {
            return Err(no_debate());
        }

        let entry = self.router.resolve(self.router.default_provider())?;
        let prompt = summary_prompt(&session.question, &session.answers, &session.critiques);
        match entry
            .backend
            .generate(None, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(generation) => {
                self.usage.record(&generation).await;
                info!(user_id, provider = %entry.id, rounds = session.rounds, "Debate summarized");
                Ok(DebateSummary {
                    question: session.question,
                    rounds: session.rounds,
                    provider_id: entry.id.clone(),
                    generation,
                })
            }
            Err(e) => {
                self.usage.record_error(&entry.id).await;
                warn!(user_id, provider = %entry.id, error = %e, "Debate summary failed");
                Err(e)
            }
        }
    }

    async fn ask(
        &self,
        entry: &ProviderEntry,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ProviderAnswer {
        let start = Instant::now();
        let result = entry.backend.generate(system_prompt, messages).await;
        let elapsed = start.elapsed();

        let (text, generation) = match result {
            Ok(generation) => {
                self.usage.record(&generation).await;
                (generation.text.clone(), Some(generation))
            }
            Err(e) => {
                warn!(provider = %entry.id, error = %e, "Provider call failed");
                self.usage.record_error(&entry.id).await;
                let detail = e.to_string();
                (
                    format!("Error: {}", truncate_chars(&detail, MAX_ERROR_DETAIL_CHARS)),
                    None,
                )
            }
        };

        ProviderAnswer {
            provider_id: entry.id.clone(),
            display: self.router.display_name(&entry.id),
            name: entry.display.clone(),
            label: entry.label(),
            text,
            elapsed,
            generation,
        }
    }
}

fn no_debate() -> ParleyError {
    ParleyError::Orchestrator("No answers to debate; ask all models first".into())
}
