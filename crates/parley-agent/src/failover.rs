use crate::backends::{build_backend, GenerationStream, LlmBackend};
use crate::config::ModelConfig;
use async_trait::async_trait;
use parley_core::{ChatMessage, Generation, ParleyError, ParleyResult, ProviderErrorKind, StreamEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How a single attempt calls its candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMode {
    /// `generate_stream`.
    Stream,
    /// `generate`.
    OneShot,
}

/// One step of the fallback plan: which candidate, called how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub candidate: usize,
    pub mode: AttemptMode,
    /// Whether this attempt is the one-shot retry of a transient failure.
    pub retry: bool,
}

impl Attempt {
    /// First attempt of a request entered with `mode`.
    pub fn first(mode: AttemptMode) -> Self {
        Self {
            candidate: 0,
            mode,
            retry: false,
        }
    }
}

/// Decide what follows a failed attempt.
///
/// `entry` is the mode the request was entered with; `candidates` is the
/// length of the candidate list. `None` means the error propagates.
///
/// | failure        | first attempt on candidate  | one-shot retry      |
/// |----------------|-----------------------------|---------------------|
/// | rate limited   | next candidate              | next candidate      |
/// | transient      | same candidate, one-shot    | next candidate      |
/// | fatal          | propagate                   | propagate           |
pub fn next_attempt(
    failed: Attempt,
    kind: ProviderErrorKind,
    entry: AttemptMode,
    candidates: usize,
) -> Option<Attempt> {
    let advance = || {
        let candidate = failed.candidate + 1;
        (candidate < candidates).then_some(Attempt {
            candidate,
            mode: entry,
            retry: false,
        })
    };

    match kind {
        ProviderErrorKind::Fatal => None,
        ProviderErrorKind::RateLimited => advance(),
        ProviderErrorKind::Transient if !failed.retry => Some(Attempt {
            candidate: failed.candidate,
            mode: AttemptMode::OneShot,
            retry: true,
        }),
        ProviderErrorKind::Transient => advance(),
    }
}

fn kind_of(err: &ParleyError) -> ProviderErrorKind {
    err.provider_kind().unwrap_or(ProviderErrorKind::Fatal)
}

/// A backend that walks an ordered list of candidates per request.
///
/// Candidates are usually the same provider at different models (the
/// configured model first). The plan is driven entirely by [`next_attempt`].
///
/// Inside a stream, a one-shot retry that succeeds is surfaced as a single
/// [`StreamEvent::TextDelta`]. Once any fragment of a streaming attempt has
/// reached the consumer, a later failure of that attempt propagates instead
/// of retrying, so the consumer never sees text twice.
pub struct FallbackPolicy {
    candidates: Vec<Arc<dyn LlmBackend>>,
}

impl FallbackPolicy {
    /// Build a policy over explicit candidates, primary first.
    pub fn new(candidates: Vec<Arc<dyn LlmBackend>>) -> ParleyResult<Self> {
        if candidates.is_empty() {
            return Err(ParleyError::Config(
                "FallbackPolicy requires at least one candidate".into(),
            ));
        }
        Ok(Self { candidates })
    }

    /// Build the candidate list for a provider config from its model chain.
    pub fn for_config(config: &ModelConfig) -> ParleyResult<Self> {
        let candidates = config
            .model_chain()
            .into_iter()
            .map(|model| build_backend(config.with_model(model)))
            .collect::<ParleyResult<Vec<_>>>()?;
        Self::new(candidates)
    }

    pub fn candidates(&self) -> &[Arc<dyn LlmBackend>] {
        &self.candidates
    }

    fn primary(&self) -> &Arc<dyn LlmBackend> {
        &self.candidates[0]
    }
}

#[async_trait]
impl LlmBackend for FallbackPolicy {
    fn provider_id(&self) -> &str {
        self.primary().provider_id()
    }

    fn model_id(&self) -> &str {
        self.primary().model_id()
    }

    async fn generate(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<Generation> {
        let mut attempt = Attempt::first(AttemptMode::OneShot);
        loop {
            let backend = &self.candidates[attempt.candidate];
            match backend.generate(system_prompt, messages).await {
                Ok(generation) => {
                    if attempt.candidate > 0 {
                        info!(model = backend.model_id(), "Fallback model succeeded");
                    }
                    return Ok(generation);
                }
                Err(e) => {
                    let kind = kind_of(&e);
                    warn!(
                        provider = backend.provider_id(),
                        model = backend.model_id(),
                        retry = attempt.retry,
                        error = %e,
                        "Generation attempt failed"
                    );
                    match next_attempt(attempt, kind, AttemptMode::OneShot, self.candidates.len()) {
                        Some(next) => attempt = next,
                        None => return Err(e),
                    }
                }
            }
        }
    }

    async fn generate_stream(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<GenerationStream> {
        let candidates = self.candidates.clone();
        let system_prompt = system_prompt.map(str::to_string);
        let messages = messages.to_vec();
        let (tx, rx) = mpsc::channel::<StreamEvent>(256);

        let handle = tokio::spawn(async move {
            let result = drive_stream(&candidates, system_prompt.as_deref(), &messages, &tx).await;
            match &result {
                Ok(_) => {
                    let _ = tx.send(StreamEvent::Done).await;
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                }
            }
            result
        });

        Ok((rx, handle))
    }

    async fn generate_with_image(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> ParleyResult<Generation> {
        let mut attempt = Attempt::first(AttemptMode::OneShot);
        loop {
            let backend = &self.candidates[attempt.candidate];
            match backend
                .generate_with_image(image, mime_type, prompt, system_prompt)
                .await
            {
                Ok(generation) => return Ok(generation),
                Err(e) => {
                    warn!(model = backend.model_id(), error = %e, "Image attempt failed");
                    match next_attempt(attempt, kind_of(&e), AttemptMode::OneShot, self.candidates.len()) {
                        Some(next) => attempt = next,
                        None => return Err(e),
                    }
                }
            }
        }
    }
}

/// Run the streaming plan, forwarding fragments to `tx`.
///
/// Inner `Done`/`Error` events are swallowed; the caller emits exactly one
/// terminal event for the whole plan.
async fn drive_stream(
    candidates: &[Arc<dyn LlmBackend>],
    system_prompt: Option<&str>,
    messages: &[ChatMessage],
    tx: &mpsc::Sender<StreamEvent>,
) -> ParleyResult<Generation> {
    let mut attempt = Attempt::first(AttemptMode::Stream);
    loop {
        let backend = &candidates[attempt.candidate];
        let mut forwarded = false;

        let outcome = match attempt.mode {
            AttemptMode::Stream => match backend.generate_stream(system_prompt, messages).await {
                Ok((mut inner_rx, inner_handle)) => {
                    while let Some(event) = inner_rx.recv().await {
                        if let StreamEvent::TextDelta { text } = event {
                            forwarded = true;
                            let _ = tx.send(StreamEvent::TextDelta { text }).await;
                        }
                    }
                    inner_handle.await.unwrap_or_else(|e| {
                        Err(ParleyError::transient(
                            backend.provider_id(),
                            format!("Stream task failed: {e}"),
                        ))
                    })
                }
                Err(e) => Err(e),
            },
            AttemptMode::OneShot => {
                let result = backend.generate(system_prompt, messages).await;
                if let Ok(generation) = &result {
                    if !generation.text.is_empty() {
                        let _ = tx
                            .send(StreamEvent::TextDelta {
                                text: generation.text.clone(),
                            })
                            .await;
                    }
                }
                result
            }
        };

        match outcome {
            Ok(generation) => {
                if attempt.candidate > 0 || attempt.retry {
                    info!(
                        model = backend.model_id(),
                        retry = attempt.retry,
                        "Fallback attempt succeeded"
                    );
                }
                return Ok(generation);
            }
            Err(e) => {
                warn!(
                    provider = backend.provider_id(),
                    model = backend.model_id(),
                    mode = ?attempt.mode,
                    error = %e,
                    "Streaming attempt failed"
                );
                if forwarded {
                    return Err(e);
                }
                match next_attempt(attempt, kind_of(&e), AttemptMode::Stream, candidates.len()) {
                    Some(next) => attempt = next,
                    None => return Err(e),
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
