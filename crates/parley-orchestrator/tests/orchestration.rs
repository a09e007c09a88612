//! Fan-out and debate flow with scripted backends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parley_agent::{GenerationStream, LlmBackend, LlmProvider, ProviderEntry, ProviderRouter, UsageLedger};
use parley_core::{ChatMessage, Generation, ParleyError, ParleyResult, Usage};
use parley_channels::{
    Button, ChatId, DeliveryConfig, Keyboard, MessageHandle, StreamingDelivery, TextFormat,
    Transport, MAX_MESSAGE_CHARS,
};
use parley_orchestrator::{
    deliver_aggregate, Aggregate, DebateState, MultiModelOrchestrator, ProviderAnswer,
};
use parley_session::{MemoryStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Scripted backend: answers with a fixed prefix, or fails
// ---------------------------------------------------------------------------

struct ScriptedBackend {
    id: &'static str,
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(id: &'static str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail,
            prompts: Mutex::new(Vec::new()),
        })
    }

    async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn provider_id(&self) -> &str {
        self.id
    }

    fn model_id(&self) -> &str {
        "test-model"
    }

    async fn generate(
        &self,
        _system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<Generation> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().await.push(prompt);
        if self.fail {
            return Err(ParleyError::fatal(self.id, "invalid api key"));
        }
        let call = self.prompts.lock().await.len();
        Ok(Generation::new(
            self.id,
            "test-model",
            format!("{} says #{call}", self.id),
            Some(Usage::new(10, 5)),
        ))
    }

    async fn generate_stream(
        &self,
        _system_prompt: Option<&str>,
        _messages: &[ChatMessage],
    ) -> ParleyResult<GenerationStream> {
        Err(ParleyError::fatal(self.id, "streaming not scripted"))
    }

    async fn generate_with_image(
        &self,
        _image: &[u8],
        _mime_type: &str,
        _prompt: &str,
        _system_prompt: Option<&str>,
    ) -> ParleyResult<Generation> {
        Err(ParleyError::fatal(self.id, "images not scripted"))
    }
}

struct Fixture {
    orchestrator: MultiModelOrchestrator,
    usage: Arc<UsageLedger>,
    claude: Arc<ScriptedBackend>,
    gpt: Arc<ScriptedBackend>,
    gemini: Arc<ScriptedBackend>,
}

fn fixture(gpt_fails: bool) -> Fixture {
    let claude = ScriptedBackend::new("claude", false);
    let gpt = ScriptedBackend::new("gpt", gpt_fails);
    let gemini = ScriptedBackend::new("gemini", false);
    let providers = vec![
        ProviderEntry::new(LlmProvider::Claude, "claude-opus-4-6", claude.clone()),
        ProviderEntry::new(LlmProvider::OpenAi, "gpt-4o", gpt.clone()),
        ProviderEntry::new(LlmProvider::Gemini, "gemini-2.5-pro", gemini.clone()),
    ];
    let router = Arc::new(ProviderRouter::new(
        providers,
        "claude",
        Arc::new(SessionStore::new(Duration::from_secs(3600))),
        Arc::new(MemoryStore::new()),
    ));
    let usage = Arc::new(UsageLedger::new());
    let orchestrator = MultiModelOrchestrator::new(
        router,
        usage.clone(),
        Arc::new(SessionStore::new(Duration::from_secs(3600))),
    )
    .with_system_prompt("be helpful");
    Fixture {
        orchestrator,
        usage,
        claude,
        gpt,
        gemini,
    }
}

// ── Test 1: Fan-out isolates failures ──

#[tokio::test]
async fn test_fan_out_with_failure_keeps_all_sections() {
    let f = fixture(true);
    let answers = f.orchestrator.ask_all(1, "what is rust?").await.unwrap();

    assert_eq!(answers.len(), 3);
    assert_eq!(answers[0].provider_id, "claude");
    assert!(answers[1].is_error());
    assert!(answers[1].text.starts_with("Error: "));
    assert!(answers[1].text.contains("invalid api key"));
    assert!(!answers[2].is_error());
    assert_eq!(answers[0].label, "Claude Opus 4.6");
    assert_eq!(answers[0].name, "Claude");

    let aggregate = Aggregate::build(&answers, "01.02.2026");
    assert_eq!(aggregate.sections_html.len(), 3);
    assert!(aggregate.footer.starts_with("Claude "));

    assert_eq!(f.usage.get("claude").await.unwrap().input_tokens, 10);
    assert_eq!(f.usage.get("gpt").await.unwrap().errors, 1);
    assert_eq!(f.orchestrator.debate_state(1), DebateState::Round1Answered);
}

// ── Test 2: Debate rounds see only the others ──

#[tokio::test]
async fn test_critique_round_shows_other_answers() {
    let f = fixture(false);
    f.orchestrator.ask_all(7, "tabs or spaces?").await.unwrap();

    let critiques = f.orchestrator.critique_round(7).await.unwrap();
    assert_eq!(critiques.len(), 3);
    assert_eq!(f.orchestrator.debate_state(7), DebateState::Critiqued { rounds: 1 });

    let claude_prompts = f.claude.prompts().await;
    let critique = &claude_prompts[1];
    assert!(critique.contains("Question: tabs or spaces?"));
    assert!(critique.contains("gpt says #1"));
    assert!(critique.contains("gemini says #1"));
    assert!(!critique.contains("claude says"));

    // Second round answers the first round's critiques.
    f.orchestrator.critique_round(7).await.unwrap();
    let gemini_prompts = f.gemini.prompts().await;
    assert!(gemini_prompts[2].contains("claude says #2"));
    assert_eq!(f.orchestrator.debate_state(7), DebateState::Critiqued { rounds: 2 });
}

// ── Test 3: Summary uses the default provider and ends the session ──

#[tokio::test]
async fn test_summarize_clears_session() {
    let f = fixture(false);
    f.orchestrator.ask_all(3, "q").await.unwrap();
    f.orchestrator.critique_round(3).await.unwrap();

    let summary = f.orchestrator.summarize(3).await.unwrap();
    assert_eq!(summary.provider_id, "claude");
    assert_eq!(summary.rounds, 1);
    assert_eq!(f.orchestrator.debate_state(3), DebateState::Idle);

    let last_prompt = f.claude.prompts().await.pop().unwrap();
    assert!(last_prompt.contains("Analysis by"));
    assert!(last_prompt.contains("Consensus"));
    assert_eq!(f.gpt.prompts().await.len(), 2);
}

// ── Test 4: Debate operations need answers first ──

#[tokio::test]
async fn test_debate_rejected_without_answers() {
    let f = fixture(false);
    assert!(matches!(
        f.orchestrator.critique_round(9).await,
        Err(ParleyError::Orchestrator(_))
    ));
    assert!(matches!(
        f.orchestrator.summarize(9).await,
        Err(ParleyError::Orchestrator(_))
    ));
    assert!(f.claude.prompts().await.is_empty());
}

// ── Test 5: A new "ask all" replaces the session ──

#[tokio::test]
async fn test_new_question_supersedes_debate() {
    let f = fixture(false);
    f.orchestrator.ask_all(5, "first").await.unwrap();
    f.orchestrator.critique_round(5).await.unwrap();
    f.orchestrator.ask_all(5, "second").await.unwrap();
    assert_eq!(f.orchestrator.debate_state(5), DebateState::Round1Answered);
}

// ── Test 6: An oversized section is split, not dropped ──

#[derive(Default)]
struct LimitedTransport {
    sent: Mutex<Vec<(String, Option<Keyboard>)>>,
}

#[async_trait]
impl Transport for LimitedTransport {
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        _format: TextFormat,
        keyboard: Option<&Keyboard>,
    ) -> ParleyResult<MessageHandle> {
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ParleyError::TransportRejected("message is too long".into()));
        }
        let mut sent = self.sent.lock().await;
        sent.push((text.to_string(), keyboard.cloned()));
        Ok(MessageHandle {
            chat_id,
            message_id: sent.len() as i64,
        })
    }

    async fn edit(
        &self,
        _handle: &MessageHandle,
        _text: &str,
        _format: TextFormat,
        _keyboard: Option<&Keyboard>,
    ) -> ParleyResult<()> {
        Ok(())
    }

    async fn delete(&self, _handle: &MessageHandle) -> ParleyResult<()> {
        Ok(())
    }
}

fn plain_answer(name: &str, text: &str) -> ProviderAnswer {
    ProviderAnswer {
        provider_id: name.to_lowercase(),
        display: name.into(),
        name: name.into(),
        label: format!("{name} Model"),
        text: text.into(),
        elapsed: Duration::from_millis(500),
        generation: None,
    }
}

#[tokio::test]
async fn test_oversized_section_is_delivered_in_chunks() {
    let transport = Arc::new(LimitedTransport::default());
    let delivery = StreamingDelivery::new(transport.clone(), DeliveryConfig::default());
    let answers = vec![
        plain_answer("Claude", &"x".repeat(5000)),
        plain_answer("GPT", "short"),
    ];
    let aggregate = Aggregate::build(&answers, "01.02.2026");
    let kb = Keyboard::new().row(vec![Button::callback("Start debate", "debate:start")]);

    let handles = deliver_aggregate(&delivery, 7, &aggregate, Some(&kb)).await;

    let sent = transport.sent.lock().await;
    assert_eq!(handles.len(), sent.len());
    assert!(sent.len() >= 3);
    let claude_chars: usize = sent
        .iter()
        .map(|(text, _)| text.chars().filter(|c| *c == 'x').count())
        .sum();
    assert_eq!(claude_chars, 5000);
    assert!(sent.last().unwrap().0.starts_with("GPT:\nshort"));
    assert_eq!(sent.last().unwrap().1.as_ref(), Some(&kb));
    assert!(sent[..sent.len() - 1].iter().all(|(_, k)| k.is_none()));
}
