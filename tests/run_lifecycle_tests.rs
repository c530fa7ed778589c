//! Run state machine: cancellation races, suspension and resumption.

mod common;

use futures::TryStreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use agora::error::AgoraError;
use agora::introspection;
use agora::model::{ModelEvent, ScriptedTurn};
use agora::runtime::DIRECT_RUN_SERVICE;
use agora::types::{
    Run, RunEvent, RunEventKind, RunFilter, RunId, RunStatus, ToolCall, TriggerContext, Usage,
};
use common::*;

fn service_trigger() -> TriggerContext {
    TriggerContext::Service {
        service_name: "test".into(),
        payload: json!({}),
        space_id: None,
    }
}

/// A booted-less harness with `count` queued runs for its only agent.
async fn queued_runs(count: usize) -> (Harness, Vec<RunId>) {
    let h = Harness::build(config_for(&["alpha"]));
    let agent = h.agents[0].clone();
    let mut ids = Vec::new();
    for _ in 0..count {
        let run = Run::queued(agent.entity_id, agent.agent_id, service_trigger());
        ids.push(run.id);
        h.runtime.services().store.insert_run(run).await.unwrap();
    }
    (h, ids)
}

async fn terminal_events(h: &Harness, run_id: RunId) -> usize {
    status_path(&h.runtime, run_id)
        .await
        .into_iter()
        .filter(|kind| kind.is_terminal())
        .count()
}

#[tokio::test]
async fn second_stop_observes_already_transitioned() {
    let (h, ids) = queued_runs(2).await;
    let (caller, target) = (ids[0], ids[1]);
    let services = h.runtime.services();
    let alpha = h.agent(0);

    let stopped = introspection::stop_run(services, alpha, caller, target, Some("duplicate"))
        .await
        .unwrap();
    assert_eq!(stopped.status, RunStatus::Canceled);
    assert_eq!(stopped.metadata.cancel_reason.as_deref(), Some("duplicate"));

    let err = introspection::stop_run(services, alpha, caller, target, None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AgoraError::AlreadyTransitioned { status: RunStatus::Canceled, .. }),
        "{err:?}"
    );
    assert_eq!(terminal_events(&h, target).await, 1);
}

#[tokio::test]
async fn stop_checks_ownership_and_self_targeting() {
    let (h, ids) = queued_runs(2).await;
    let services = h.runtime.services();

    let err = introspection::stop_run(services, Uuid::new_v4(), ids[0], ids[1], None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::NotOwner { .. }));

    let err = introspection::stop_run(services, h.agent(0), ids[0], ids[0], None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArgument(_)));

    let untouched = h.runtime.get_run(ids[1]).await.unwrap();
    assert_eq!(untouched.status, RunStatus::Queued);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_stop_and_absorb_have_exactly_one_winner() {
    for _ in 0..20 {
        let (h, ids) = queued_runs(3).await;
        let (stopper, absorber, target) = (ids[0], ids[1], ids[2]);
        let alpha = h.agent(0);

        let services = h.runtime.services().clone();
        let stop = tokio::spawn(async move {
            introspection::stop_run(&services, alpha, stopper, target, None)
                .await
                .is_ok()
        });
        let services = h.runtime.services().clone();
        let absorb = tokio::spawn(async move {
            introspection::absorb_run(&services, alpha, absorber, target)
                .await
                .is_ok()
        });
        let (stopped, absorbed) = (stop.await.unwrap(), absorb.await.unwrap());
        assert!(stopped ^ absorbed, "stop={stopped} absorb={absorbed}");

        let run = h.runtime.get_run(target).await.unwrap();
        assert_eq!(run.status, RunStatus::Canceled);
        assert_eq!(run.metadata.absorbed_by.is_some(), absorbed);
        assert_eq!(terminal_events(&h, target).await, 1);
    }
}

#[tokio::test]
async fn submitting_results_requires_a_waiting_run_and_a_known_call() {
    let (h, ids) = queued_runs(1).await;

    let err = h
        .runtime
        .submit_tool_result(Uuid::new_v4(), "c1", json!(true))
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::UnknownRun(_)));

    let err = h
        .runtime
        .submit_tool_result(ids[0], "c1", json!(true))
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::NotWaiting { status: RunStatus::Queued, .. }));
    assert!(err.is_precondition());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resumed_run_keeps_output_streamed_before_suspension() {
    let h = Harness::start(&["alpha"]).await;
    let alpha = h.agent(0);
    h.model.push(
        alpha,
        ScriptedTurn::Events(vec![
            ModelEvent::TextDelta("Let me ".into()),
            ModelEvent::TextDelta("check first.".into()),
            ModelEvent::ToolCall(ToolCall {
                id: "c1".into(),
                name: "confirm".into(),
                arguments: json!({ "question": "proceed?" }),
            }),
            ModelEvent::ToolCall(ToolCall {
                id: "c2".into(),
                name: "confirm".into(),
                arguments: json!({ "question": "really?" }),
            }),
            ModelEvent::Finish {
                usage: Usage::default(),
            },
        ]),
    );
    h.model.push(alpha, ScriptedTurn::text("All confirmed."));
    h.say("do the thing").await;

    let waiting = h.wait_run_in(alpha, RunStatus::WaitingTool).await;
    assert_eq!(waiting.metadata.pending_tool_calls.len(), 2);

    let err = h
        .runtime
        .submit_tool_result(waiting.id, "nope", json!(true))
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::UnknownToolCall { .. }));

    // One of two answers keeps the run suspended; a repeated answer is ignored.
    let partial = h
        .runtime
        .submit_tool_result(waiting.id, "c1", json!({ "confirmed": true }))
        .await
        .unwrap();
    assert_eq!(partial.status, RunStatus::WaitingTool);
    let repeated = h
        .runtime
        .submit_tool_result(waiting.id, "c1", json!({ "confirmed": false }))
        .await
        .unwrap();
    assert_eq!(
        repeated.metadata.tool_results["c1"],
        json!({ "confirmed": true })
    );

    h.runtime
        .submit_tool_result(waiting.id, "c2", json!({ "confirmed": true }))
        .await
        .unwrap();
    let done = h.wait_status(waiting.id, RunStatus::Completed).await;
    assert_eq!(done.metadata.actions.tool_calls.len(), 2);

    let err = h
        .runtime
        .submit_tool_result(waiting.id, "c2", json!(true))
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::NotWaiting { status: RunStatus::Completed, .. }));

    let events: Vec<RunEvent> = h
        .runtime
        .run_events(waiting.id, 0)
        .try_collect()
        .await
        .unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]), "{seqs:?}");
    let first_text = events
        .iter()
        .find(|e| e.kind == RunEventKind::TextDone)
        .unwrap();
    assert_eq!(first_text.payload["text"], json!("Let me check first."));
    assert_eq!(events.last().unwrap().kind, RunEventKind::RunCompleted);

    let resumed = h.model.requests_for(alpha).pop().unwrap();
    let transcript: String = resumed.messages.iter().map(|m| m.text()).collect();
    assert!(transcript.contains("Let me check first."), "{transcript}");
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn observed_status_paths_are_valid() {
    let h = Harness::start(&["alpha"]).await;
    let alpha = h.agent(0);
    h.model.push(
        alpha,
        ScriptedTurn::tool_call("c1", "confirm", json!({ "question": "go?" })),
    );
    h.model.push(alpha, ScriptedTurn::text("went"));
    h.model.push(alpha, ScriptedTurn::fail("provider closed the stream"));
    h.say("first").await;
    let waiting = h.wait_run_in(alpha, RunStatus::WaitingTool).await;
    h.say("second").await;
    h.runtime
        .submit_tool_result(waiting.id, "c1", json!({ "ok": true }))
        .await
        .unwrap();

    let runs = h.wait_settled(alpha, 2).await;
    let failed = runs.iter().find(|run| run.status == RunStatus::Failed).unwrap();
    assert!(failed.error.as_deref().unwrap().contains("provider closed"));

    for run in &runs {
        let path = status_path(&h.runtime, run.id).await;
        assert_eq!(path.first(), Some(&RunEventKind::RunStarted));
        assert_eq!(path.iter().filter(|kind| kind.is_terminal()).count(), 1);
        for pair in path.windows(2) {
            if pair[0] == RunEventKind::RunWaitingTool {
                assert!(
                    pair[1] == RunEventKind::RunResumed || pair[1].is_terminal(),
                    "{path:?}"
                );
            }
        }
        if path.contains(&RunEventKind::RunWaitingTool) {
            let run = h.runtime.get_run(run.id).await.unwrap();
            assert!(run
                .metadata
                .actions
                .tool_calls
                .iter()
                .any(|call| call.tool_name == "confirm"));
        }
    }
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn created_run_is_executed_by_its_agent() {
    let h = Harness::start(&["alpha", "beta"]).await;
    let alpha = h.agent(0);
    h.model.push(alpha, ScriptedTurn::text("report filed"));

    let created = h
        .runtime
        .create_run(alpha, json!({ "task": "report" }), Some(h.space))
        .await
        .unwrap();
    assert_eq!(created.status, RunStatus::Queued);
    match &created.trigger {
        TriggerContext::Service { service_name, payload, space_id } => {
            assert_eq!(service_name, DIRECT_RUN_SERVICE);
            assert_eq!(payload, &json!({ "task": "report" }));
            assert_eq!(*space_id, Some(h.space));
        }
        other => panic!("unexpected trigger {other:?}"),
    }

    let done = h.wait_status(created.id, RunStatus::Completed).await;
    assert_eq!(done.agent_entity_id, alpha);

    let by_agent = h
        .runtime
        .list_runs(&RunFilter::builder().agent_id(h.agents[0].agent_id).build())
        .await
        .unwrap();
    assert_eq!(by_agent.len(), 1);
    assert_eq!(by_agent[0].id, created.id);

    let other = h
        .runtime
        .list_runs(&RunFilter::builder().agent_id(h.agents[1].agent_id).build())
        .await
        .unwrap();
    assert!(other.is_empty());
    h.runtime.shutdown().await;
}

#[tokio::test]
async fn creating_a_run_for_an_unknown_agent_fails() {
    let h = Harness::build(config_for(&["alpha"]));
    let err = h
        .runtime
        .create_run(Uuid::new_v4(), json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::UnknownAgent(_)), "{err:?}");
}
