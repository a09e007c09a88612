use crate::{TurnId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of the participant that authored a turn or message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
}

impl Role {
    /// Lowercase wire name (`user` / `assistant`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse the lowercase wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A message as sent to a model backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One stored user or assistant message in a conversation log.
///
/// Turns are append-only. The only mutation ever applied is deletion of a
/// prefix during compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Store-assigned, strictly increasing identifier.
    pub id: TurnId,
    /// Owner of the conversation.
    pub user_id: UserId,
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the turn.
    pub content: String,
    /// Provider that produced an assistant turn.
    pub provider_id: Option<String>,
    /// Output tokens reported for an assistant turn.
    pub token_count: Option<u64>,
    /// UTC timestamp of when the turn was stored.
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Project the turn into the shape backends consume.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A turn that has not been persisted yet; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewTurn {
    /// Owner of the conversation.
    pub user_id: UserId,
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the turn.
    pub content: String,
    /// Provider that produced an assistant turn.
    pub provider_id: Option<String>,
    /// Output tokens reported for an assistant turn.
    pub token_count: Option<u64>,
}

impl NewTurn {
    /// A user turn with no provider attribution.
    pub fn user(user_id: UserId, content: impl Into<String>) -> Self {
        Self {
            user_id,
            role: Role::User,
            content: content.into(),
            provider_id: None,
            token_count: None,
        }
    }

    /// An assistant turn attributed to `provider_id`.
    pub fn assistant(
        user_id: UserId,
        content: impl Into<String>,
        provider_id: impl Into<String>,
        token_count: Option<u64>,
    ) -> Self {
        Self {
            user_id,
            role: Role::Assistant,
            content: content.into(),
            provider_id: Some(provider_id.into()),
            token_count,
        }
    }
}

/// A generated summary that replaced a contiguous prefix of turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    /// Store-assigned identifier; summaries are listed in ascending id order.
    pub id: i64,
    /// Owner of the conversation.
    pub user_id: UserId,
    /// The summary text prepended to future contexts.
    pub summary_text: String,
    /// First turn id covered (inclusive).
    pub covered_from: TurnId,
    /// Last turn id covered (inclusive).
    pub covered_to: TurnId,
    /// Rough token estimate of the transcript that was replaced.
    pub estimated_tokens_saved: u64,
    /// UTC timestamp of when the summary was stored.
    pub created_at: DateTime<Utc>,
}

impl ContextSummary {
    /// Whether `turn_id` falls inside the covered range.
    pub fn covers(&self, turn_id: TurnId) -> bool {
        (self.covered_from..=self.covered_to).contains(&turn_id)
    }
}

/// A summary that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewSummary {
    /// Owner of the conversation.
    pub user_id: UserId,
    /// The summary text.
    pub summary_text: String,
    /// First turn id covered (inclusive).
    pub covered_from: TurnId,
    /// Last turn id covered (inclusive).
    pub covered_to: TurnId,
    /// Rough token estimate of the transcript that was replaced.
    pub estimated_tokens_saved: u64,
}
