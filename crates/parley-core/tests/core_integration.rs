#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use parley_core::*;

// ---------------------------------------------------------------------------
// 1. Turn serialization roundtrip
// ---------------------------------------------------------------------------

#[test]
fn turn_serialization_roundtrip() {
    let turn = ConversationTurn {
        id: 42,
        user_id: 1001,
        role: Role::Assistant,
        content: "Hello from Claude".to_string(),
        provider_id: Some("claude".to_string()),
        token_count: Some(17),
        timestamp: Utc::now(),
    };

    let json = serde_json::to_string(&turn).unwrap();
    let deserialized: ConversationTurn = serde_json::from_str(&json).unwrap();

    assert_eq!(deserialized.id, 42);
    assert_eq!(deserialized.role, Role::Assistant);
    assert_eq!(deserialized.provider_id.as_deref(), Some("claude"));
    assert_eq!(deserialized.timestamp, turn.timestamp);
    assert_eq!(
        deserialized.to_chat_message(),
        ChatMessage::assistant("Hello from Claude")
    );
}

// ---------------------------------------------------------------------------
// 2. NewTurn constructors
// ---------------------------------------------------------------------------

#[test]
fn new_turn_constructors_attribute_provider() {
    let user = NewTurn::user(7, "question");
    assert_eq!(user.role, Role::User);
    assert!(user.provider_id.is_none());

    let assistant = NewTurn::assistant(7, "answer", "gpt", Some(120));
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(assistant.provider_id.as_deref(), Some("gpt"));
    assert_eq!(assistant.token_count, Some(120));
}

// ---------------------------------------------------------------------------
// 3. Error taxonomy
// ---------------------------------------------------------------------------

#[test]
fn error_taxonomy_is_preserved_through_constructors() {
    let cases = [
        (ParleyError::rate_limited("gpt", "429"), ProviderErrorKind::RateLimited),
        (ParleyError::transient("claude", "502"), ProviderErrorKind::Transient),
        (ParleyError::fatal("gemini", "400"), ProviderErrorKind::Fatal),
    ];
    for (err, kind) in cases {
        assert_eq!(err.provider_kind(), Some(kind));
    }
}

#[test]
fn io_and_json_errors_convert() {
    let io: ParleyError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(io.to_string().contains("gone"));

    let json_err = serde_json::from_str::<Usage>("{not json").unwrap_err();
    let err: ParleyError = json_err.into();
    assert!(matches!(err, ParleyError::Json(_)));
}

// ---------------------------------------------------------------------------
// 4. Usage and stream events
// ---------------------------------------------------------------------------

#[test]
fn usage_total_and_generation() {
    let generation = Generation::new("claude", "claude-sonnet-4", "hi", Some(Usage::new(10, 5)));
    assert_eq!(generation.usage.unwrap().total(), 15);
}

#[test]
fn stream_event_tagged_serialization() {
    let event = StreamEvent::TextDelta { text: "abc".into() };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "text_delta");
    assert_eq!(json["text"], "abc");

    let done: StreamEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
    assert_eq!(done, StreamEvent::Done);
}
