use chrono::{DateTime, Utc};
use parley_core::Generation;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One provider's contribution to a fan-out or debate round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAnswer {
    pub provider_id: String,
    /// Full display name, e.g. `Claude (claude-opus-4-6)`.
    pub display: String,
    /// Short name used in timing footers, e.g. `Claude`.
    pub name: String,
    /// Signature label, e.g. `Claude Opus 4.6`.
    pub label: String,
    /// Model output, or an `Error: …` placeholder.
    pub text: String,
    pub elapsed: Duration,
    /// Present when the call succeeded.
    pub generation: Option<Generation>,
}

impl ProviderAnswer {
    pub fn is_error(&self) -> bool {
        self.generation.is_none()
    }

    /// `"<name> 1.2s"`
    pub fn timing(&self) -> String {
        format!("{} {:.1}s", self.name, self.elapsed.as_secs_f64())
    }
}

/// Where a user's debate currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum DebateState {
    /// No live session.
    Idle,
    /// Initial answers collected.
    Round1Answered,
    /// `rounds` critique rounds completed.
    Critiqued { rounds: u32 },
}

/// Ephemeral per-user debate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub question: String,
    /// Round-one answers, in provider order.
    pub answers: Vec<ProviderAnswer>,
    /// Latest critique round, empty before the first one.
    pub critiques: Vec<ProviderAnswer>,
    pub rounds: u32,
    pub started_at: DateTime<Utc>,
}

impl DebateSession {
    pub fn new(question: impl Into<String>, answers: Vec<ProviderAnswer>) -> Self {
        Self {
            question: question.into(),
            answers,
            critiques: Vec::new(),
            rounds: 0,
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> DebateState {
        if self.rounds == 0 {
            DebateState::Round1Answered
        } else {
            DebateState::Critiqued {
                rounds: self.rounds,
            }
        }
    }

    /// What the next critique round responds to: the previous critiques,
    /// or the initial answers before the first round.
    pub fn latest(&self) -> &[ProviderAnswer] {
        if self.critiques.is_empty() {
            &self.answers
        } else {
            &self.critiques
        }
    }
}

/// Final synthesis of a debate. The session is gone once this exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSummary {
    pub question: String,
    pub rounds: u32,
    /// Provider that wrote the synthesis.
    pub provider_id: String,
    pub generation: Generation,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(id: &str, text: &str) -> ProviderAnswer {
        ProviderAnswer {
            provider_id: id.into(),
            display: id.into(),
            name: id.into(),
            label: id.into(),
            text: text.into(),
            elapsed: Duration::from_millis(1230),
            generation: None,
        }
    }

    #[test]
    fn test_timing_format() {
        assert_eq!(answer("Claude", "x").timing(), "Claude 1.2s");
    }

    #[test]
    fn test_session_state_and_latest() {
        let mut session = DebateSession::new("q", vec![answer("a", "first")]);
        assert_eq!(session.state(), DebateState::Round1Answered);
        assert_eq!(session.latest()[0].text, "first");

        session.critiques = vec![answer("a", "critique")];
        session.rounds = 1;
        assert_eq!(session.state(), DebateState::Critiqued { rounds: 1 });
        assert_eq!(session.latest()[0].text, "critique");
    }
}
