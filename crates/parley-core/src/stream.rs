use serde::{Deserialize, Serialize};

/// Events emitted during a streaming backend response.
///
/// Backends push these through a bounded channel while a spawned task reads
/// the provider's SSE body; the task's join handle resolves to the final
/// [`Generation`](crate::Generation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of text content from the assistant.
    TextDelta {
        /// The fragment, appended verbatim to the buffer.
        text: String,
    },

    /// The stream has finished successfully.
    Done,

    /// An error occurred during streaming.
    Error {
        /// Human-readable description of the failure.
        message: String,
    },
}
