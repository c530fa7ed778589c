//! Replay from the store plus a live tail.

mod common;

use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use agora::model::ScriptedTurn;
use agora::types::{EntityEventKind, RunEventKind, SpaceEventKind};
use common::*;

const NEXT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn space_subscriber_replays_then_tails() {
    let h = Harness::start(&[]).await;
    for text in ["one", "two", "three"] {
        h.say(text).await;
    }

    let mut events = h.runtime.space_events(h.space, 1);
    let mut seqs = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(NEXT, events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, SpaceEventKind::Message);
        seqs.push(event.seq.unwrap());
    }
    assert_eq!(seqs, vec![2, 3]);

    h.say("four").await;
    let live = loop {
        let event = tokio::time::timeout(NEXT, events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if event.kind == SpaceEventKind::Message {
            break event;
        }
    };
    assert_eq!(live.seq, Some(4));
    assert_eq!(live.message().unwrap().content.as_deref(), Some("four"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_run_subscriber_sees_the_full_ordered_log() {
    let h = Harness::start(&["alpha"]).await;
    let alpha = h.agent(0);
    h.model.push(
        alpha,
        ScriptedTurn::tool_call("s1", "send_message", json!({ "text": "on it" })),
    );
    h.model.push(alpha, ScriptedTurn::reasoning_then_text("thinking", "all done"));
    h.say("start").await;
    let run = h.wait_settled(alpha, 1).await.remove(0);

    let events: Vec<_> = h
        .runtime
        .run_events(run.id, 0)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|event| event.unwrap())
        .collect();
    let kinds: Vec<RunEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&RunEventKind::RunStarted));
    assert_eq!(kinds.last(), Some(&RunEventKind::RunCompleted));
    assert!(kinds.contains(&RunEventKind::ToolOutputAvailable));
    assert!(kinds.contains(&RunEventKind::ReasoningDone));
    assert!(events.windows(2).all(|pair| pair[0].seq < pair[1].seq));

    // Resuming mid-log yields only the tail.
    let tail_from = events[events.len() - 3].seq;
    let tail: Vec<_> = h
        .runtime
        .run_events(run.id, tail_from)
        .collect::<Vec<_>>()
        .await;
    assert_eq!(tail.len(), 2);
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn entity_stream_reports_inbox_and_run_lifecycle() {
    let h = Harness::start(&["alpha"]).await;
    let alpha = h.agent(0);
    let mut events = h.runtime.entity_events(alpha, 0);
    h.say("ping").await;

    let mut kinds = Vec::new();
    while !kinds.contains(&EntityEventKind::RunFinished) {
        let event = tokio::time::timeout(NEXT, events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.entity_id, alpha);
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            EntityEventKind::InboxReceived,
            EntityEventKind::RunCreated,
            EntityEventKind::RunFinished,
        ]
    );
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn space_stream_brackets_a_run_with_presence_events() {
    let h = Harness::start(&["alpha"]).await;
    let alpha = h.agent(0);
    h.model.push(alpha, ScriptedTurn::text("hi there"));
    h.runtime
        .post_message(h.space, h.human, "warm-up", false)
        .await
        .unwrap();
    // The first item comes from the backfill, so the live tail is attached.
    let mut events = h.runtime.space_events(h.space, 0);
    let first = tokio::time::timeout(NEXT, events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.seq, Some(1));
    h.say("hello").await;

    let mut presence = Vec::new();
    while presence.last() != Some(&SpaceEventKind::AgentInactive) {
        let event = tokio::time::timeout(NEXT, events.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if matches!(event.kind, SpaceEventKind::AgentActive | SpaceEventKind::AgentInactive) {
            assert_eq!(event.payload["entityId"], json!(alpha));
            presence.push(event.kind);
        }
    }
    assert_eq!(
        presence,
        vec![SpaceEventKind::AgentActive, SpaceEventKind::AgentInactive]
    );
    h.runtime.shutdown().await;
}
