#![allow(clippy::unwrap_used, clippy::expect_used)]

use parley_core::{NewSummary, NewTurn, Role};
use parley_session::{
    ChatStore, ConversationStore, MemoryStore, PreferenceStore, SummaryStore,
};

/// Exercise the store contract against any implementation.
async fn check_contract(store: &dyn ChatStore) {
    // Append and read back
    let mut ids = Vec::new();
    for i in 0..6 {
        let turn = if i % 2 == 0 {
            NewTurn::user(10, format!("q{i}"))
        } else {
            NewTurn::assistant(10, format!("a{i}"), "claude", Some(i))
        };
        ids.push(store.append_turn(turn).await.unwrap().id);
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(store.count_turns(10).await.unwrap(), 6);
    assert_eq!(store.count_turns(11).await.unwrap(), 0);

    let recent = store.recent_turns(10, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].content, "q4");
    assert_eq!(recent[1].content, "a5");
    assert_eq!(recent[1].role, Role::Assistant);
    assert_eq!(recent[1].provider_id.as_deref(), Some("claude"));
    assert_eq!(recent[1].token_count, Some(5));

    // Compact the oldest four
    let oldest = store.oldest_turns(10, 4).await.unwrap();
    let summary = store
        .compact(
            NewSummary {
                user_id: 10,
                summary_text: "talked about q0..a3".into(),
                covered_from: oldest[0].id,
                covered_to: oldest[3].id,
                estimated_tokens_saved: 8,
            },
            4,
        )
        .await
        .unwrap()
        .expect("range matches");
    assert_eq!(summary.covered_from, ids[0]);
    assert_eq!(summary.covered_to, ids[3]);

    let remaining = store.recent_turns(10, 100).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|t| !summary.covers(t.id)));

    let summaries = store.summaries(10).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].summary_text, "talked about q0..a3");

    // Replaying the same compaction is a no-op
    let replay = store
        .compact(
            NewSummary {
                user_id: 10,
                summary_text: "dup".into(),
                covered_from: ids[0],
                covered_to: ids[3],
                estimated_tokens_saved: 8,
            },
            4,
        )
        .await
        .unwrap();
    assert!(replay.is_none());
    assert_eq!(store.summaries(10).await.unwrap().len(), 1);

    // New ids keep increasing after deletion
    let next = store.append_turn(NewTurn::user(10, "later")).await.unwrap();
    assert!(next.id > ids[5]);

    // Preferences
    assert_eq!(store.get_preference(10).await.unwrap(), None);
    store.set_preference(10, "gpt").await.unwrap();
    store.set_preference(10, "gemini").await.unwrap();
    assert_eq!(store.get_preference(10).await.unwrap().as_deref(), Some("gemini"));

    // Clear
    assert_eq!(store.clear_history(10).await.unwrap(), 3);
    assert!(store.summaries(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_store_contract() {
    let store = MemoryStore::new();
    check_contract(&store).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_store_contract() {
    let store = parley_session::SqliteStore::in_memory().unwrap();
    check_contract(&store).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_persists_across_instances() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("db").join("parley.sqlite");

    {
        let store = parley_session::SqliteStore::open(&path).await.unwrap();
        store.append_turn(NewTurn::user(1, "persist me")).await.unwrap();
        store.set_preference(1, "claude").await.unwrap();
    }

    let store = parley_session::SqliteStore::open(&path).await.unwrap();
    let turns = store.recent_turns(1, 10).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].content, "persist me");
    assert_eq!(store.get_preference(1).await.unwrap().as_deref(), Some("claude"));
}
