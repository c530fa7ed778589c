//! Message sequencing under contention.

mod common;

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use serde_json::json;

use agora::error::{AgoraError, ErrorCategory};
use agora::types::{MessageQuery, MessageRole, NewMessage};
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_writers_get_unique_contiguous_seqs() {
    let mut config = config_for(&[]);
    config.sequencer.max_attempts = 64;
    let h = Harness::build(config);
    let runtime = std::sync::Arc::new(h.runtime);

    let writers: Vec<_> = (0..16)
        .map(|i| {
            let runtime = runtime.clone();
            let (space, human) = (h.space, h.human);
            tokio::spawn(async move {
                runtime
                    .post_message(space, human, format!("writer {i}"), false)
                    .await
                    .unwrap()
                    .seq
            })
        })
        .collect();
    let mut seqs = Vec::new();
    for writer in writers {
        seqs.push(writer.await.unwrap());
    }

    let unique: BTreeSet<i64> = seqs.iter().copied().collect();
    assert_eq!(unique.len(), 16);
    assert_eq!(unique, (1..=16).collect::<BTreeSet<i64>>());

    let stored: Vec<i64> = runtime
        .list_messages(h.space, MessageQuery::default())
        .await
        .unwrap()
        .iter()
        .map(|m| m.seq)
        .collect();
    assert_eq!(stored, (1..=16).collect::<Vec<i64>>());
}

#[tokio::test]
async fn exhausted_retries_fail_the_write_without_persisting() {
    let mut config = config_for(&[]);
    config.sequencer.max_attempts = 3;
    let h = Harness::build(config);
    h.store.set_conflicting(true);

    let err = h
        .runtime
        .post_message(h.space, h.human, "lost", false)
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::Conflict { .. }), "{err:?}");
    assert_eq!(err.category(), ErrorCategory::Conflict);
    assert!(err.is_retryable());

    h.store.set_conflicting(false);
    assert!(h.messages().await.is_empty());
    let next = h.say("kept").await;
    assert_eq!(next.seq, 1);
}

#[tokio::test]
async fn non_members_cannot_post() {
    let h = Harness::build(config_for(&["alpha"]));
    let err = h
        .runtime
        .post_message(h.space, uuid::Uuid::new_v4(), "intruder", false)
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::NotMember { .. }));
    assert!(h.messages().await.is_empty());
}

#[tokio::test]
async fn send_keeps_role_and_metadata() {
    let h = Harness::build(config_for(&["alpha"]));
    let message = NewMessage::builder()
        .space_id(h.space)
        .entity_id(h.human)
        .role(MessageRole::System)
        .content("maintenance at noon")
        .metadata(json!({ "pinned": true }))
        .build();
    let sent = h.runtime.send(message, false).await.unwrap();
    assert_eq!(sent.seq, 1);

    let stored = h.messages().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, MessageRole::System);
    assert_eq!(stored[0].metadata, json!({ "pinned": true }));

    let outsider = NewMessage::builder()
        .space_id(h.space)
        .entity_id(uuid::Uuid::new_v4())
        .content("hello")
        .build();
    let err = h.runtime.send(outsider, false).await.unwrap_err();
    assert!(matches!(err, AgoraError::NotMember { .. }));
}

#[tokio::test]
async fn history_pages_backwards_from_a_seq() {
    let h = Harness::build(config_for(&[]));
    for i in 1..=6 {
        h.say(&format!("m{i}")).await;
    }
    let page = h
        .runtime
        .list_messages(
            h.space,
            MessageQuery::builder().before_seq(5).limit(2).build(),
        )
        .await
        .unwrap();
    let seqs: Vec<i64> = page.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![3, 4]);

    let older = h
        .runtime
        .list_messages(
            h.space,
            MessageQuery::builder().before_seq(3).limit(5).build(),
        )
        .await
        .unwrap();
    let seqs: Vec<i64> = older.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
}
