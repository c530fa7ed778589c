//! Delegation, mentions, plans and service triggers.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use agora::config::SpaceDefinition;
use agora::inbox::{Plan, Schedule};
use agora::model::ScriptedTurn;
use agora::types::{EntityId, MessageQuery, Run, RunId, RunStatus, TriggerContext};
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delegation_hands_the_original_trigger_over_silently() {
    let h = Harness::start(&["alpha", "beta"]).await;
    let (alpha, beta) = (h.agent(0), h.agent(1));
    h.model.push(
        alpha,
        ScriptedTurn::tool_call(
            "d1",
            "delegate_to_agent",
            json!({ "agent_id": beta, "note": "billing is yours" }),
        ),
    );
    h.model.push(
        beta,
        ScriptedTurn::tool_call("s1", "send_message", json!({ "text": "refund issued" })),
    );
    h.runtime
        .trigger_service(alpha, "tickets", json!({ "ticket": 7 }), Some(h.space))
        .await
        .unwrap();

    let handled = h.wait_settled(beta, 1).await.remove(0);
    assert_eq!(handled.status, RunStatus::Completed);
    let TriggerContext::Delegation {
        from_entity_id,
        from_run_id,
        note,
        original,
    } = &handled.trigger
    else {
        panic!("expected a delegation, got {:?}", handled.trigger);
    };
    assert_eq!(*from_entity_id, alpha);
    assert_eq!(note.as_deref(), Some("billing is yours"));
    assert!(matches!(**original, TriggerContext::Service { .. }));

    let delegated = h.wait_status(*from_run_id, RunStatus::Canceled).await;
    assert_eq!(
        delegated.metadata.cancel_reason,
        Some(format!("delegated to {beta}"))
    );
    assert!(delegated.metadata.actions.messages_sent.is_empty());

    let messages = h.wait_messages(1).await;
    assert_eq!(messages[0].entity_id, beta);
    assert_eq!(messages[0].content.as_deref(), Some("refund issued"));
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mention_expecting_a_reply_comes_back_as_a_trigger() {
    let h = Harness::start(&["alpha", "beta"]).await;
    let (alpha, beta) = (h.agent(0), h.agent(1));
    h.model.push(
        alpha,
        ScriptedTurn::tool_call(
            "m1",
            "mention_agent",
            json!({ "agent_id": beta, "message": "what is the ETA?", "expect_reply": true }),
        ),
    );
    h.model.push(beta, ScriptedTurn::text("tomorrow"));
    h.runtime
        .trigger_service(alpha, "standup", json!({}), Some(h.space))
        .await
        .unwrap();

    let asked = h.wait_settled(beta, 1).await.remove(0);
    let TriggerContext::Mention {
        from_run_id: Some(asking_run),
        expect_reply: true,
        message,
        ..
    } = &asked.trigger
    else {
        panic!("expected a mention, got {:?}", asked.trigger);
    };
    assert_eq!(message, "what is the ETA?");

    let runs = h.wait_settled(alpha, 2).await;
    let reply = runs
        .iter()
        .find_map(|run| match &run.trigger {
            TriggerContext::Reply {
                reply_to_run_id,
                from_entity_id,
                content,
                ..
            } => Some((*reply_to_run_id, *from_entity_id, content.clone())),
            _ => None,
        })
        .expect("reply trigger");
    assert_eq!(reply, (*asking_run, beta, "tomorrow".to_string()));
    assert!(runs.iter().all(|run| run.status == RunStatus::Completed));
    h.runtime.shutdown().await;
}

/// Alpha mentions beta, expecting a reply.
async fn ask_beta(h: &Harness, alpha: EntityId, beta: EntityId) {
    h.model.push(
        alpha,
        ScriptedTurn::tool_call(
            "m1",
            "mention_agent",
            json!({ "agent_id": beta, "message": "can you check?", "expect_reply": true }),
        ),
    );
    h.runtime
        .trigger_service(alpha, "standup", json!({}), Some(h.space))
        .await
        .unwrap();
}

/// The `Reply` triggers alpha has received, as `(reply_to_run_id, content)`.
fn replies(runs: &[Run]) -> Vec<(RunId, String)> {
    runs.iter()
        .filter_map(|run| match &run.trigger {
            TriggerContext::Reply {
                reply_to_run_id,
                content,
                ..
            } => Some((*reply_to_run_id, content.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_mention_still_answers_the_mentioner() {
    let h = Harness::start(&["alpha", "beta"]).await;
    let (alpha, beta) = (h.agent(0), h.agent(1));
    h.model.push(beta, ScriptedTurn::fail("model unavailable"));
    ask_beta(&h, alpha, beta).await;

    let failed = h.wait_settled(beta, 1).await.remove(0);
    assert_eq!(failed.status, RunStatus::Failed);

    let runs = h.wait_settled(alpha, 2).await;
    let answered = replies(&runs);
    assert_eq!(answered.len(), 1);
    assert!(answered[0].1.starts_with("run failed"), "{}", answered[0].1);
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn canceled_mention_answers_with_the_reason() {
    let h = Harness::start(&["alpha", "beta"]).await;
    let (alpha, beta) = (h.agent(0), h.agent(1));
    h.model.push(
        beta,
        ScriptedTurn::tool_call("c1", "confirm", json!({ "question": "go ahead?" })),
    );
    ask_beta(&h, alpha, beta).await;

    let waiting = h.wait_run_in(beta, RunStatus::WaitingTool).await;
    h.runtime.cancel_run(waiting.id, None).await.unwrap();

    let runs = h.wait_settled(alpha, 2).await;
    let answered = replies(&runs);
    assert_eq!(answered.len(), 1);
    assert_eq!(answered[0].1, "run canceled: canceled by operator");
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn absorbing_run_answers_the_donors_mention() {
    let h = Harness::start(&["alpha", "beta"]).await;
    let (alpha, beta) = (h.agent(0), h.agent(1));
    h.model.push(
        beta,
        ScriptedTurn::tool_call("c1", "confirm", json!({ "question": "go ahead?" })),
    );
    ask_beta(&h, alpha, beta).await;
    let donor = h.wait_run_in(beta, RunStatus::WaitingTool).await;
    let asking_run = match &donor.trigger {
        TriggerContext::Mention {
            from_run_id: Some(run_id),
            ..
        } => *run_id,
        other => panic!("expected a mention, got {other:?}"),
    };

    h.model.push(
        beta,
        ScriptedTurn::tool_call("a1", "absorb_run", json!({ "run_id": donor.id })),
    );
    h.model.push(beta, ScriptedTurn::text("both handled"));
    h.runtime
        .trigger_service(beta, "tickets", json!({}), Some(h.space))
        .await
        .unwrap();

    let beta_runs = h.wait_settled(beta, 2).await;
    let donor = beta_runs.iter().find(|run| run.id == donor.id).unwrap();
    assert_eq!(donor.status, RunStatus::Canceled);
    assert!(donor.metadata.absorbed_by.is_some());

    let runs = h.wait_settled(alpha, 2).await;
    assert_eq!(
        replies(&runs),
        vec![(asking_run, "both handled".to_string())]
    );
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delegating_to_a_human_is_an_error_result() {
    let h = Harness::start(&["alpha"]).await;
    let alpha = h.agent(0);
    h.model.push(
        alpha,
        ScriptedTurn::tool_call("d1", "delegate_to_agent", json!({ "agent_id": h.human })),
    );
    h.say("hand this off").await;

    let run = h.wait_settled(alpha, 1).await.remove(0);
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.metadata.actions.tool_calls[0].is_error);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn entering_a_space_redirects_send_message() {
    let mut config = config_for(&["alpha"]);
    let ops = uuid::Uuid::new_v4();
    config.spaces.push(SpaceDefinition {
        id: ops,
        name: "ops".into(),
        members: vec![config.agents[0].entity_id],
    });
    let h = Harness::start_with(config).await;
    let alpha = h.agent(0);
    h.model.push(
        alpha,
        ScriptedTurn::tool_call("e1", "enter_space", json!({ "space_id": ops })),
    );
    h.model.push(
        alpha,
        ScriptedTurn::tool_call("s1", "send_message", json!({ "text": "moved over" })),
    );
    h.say("take it to ops").await;

    let run = h.wait_settled(alpha, 1).await.remove(0);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.active_space_id, Some(ops));

    let posted = h.runtime.list_messages(ops, MessageQuery::default()).await.unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].entity_id, alpha);
    assert_eq!(posted[0].content.as_deref(), Some("moved over"));
    assert!(h.messages().await.iter().all(|m| m.entity_id != alpha));
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn entering_a_foreign_space_is_refused() {
    let h = Harness::start(&["alpha"]).await;
    let alpha = h.agent(0);
    h.model.push(
        alpha,
        ScriptedTurn::tool_call("e1", "enter_space", json!({ "space_id": uuid::Uuid::new_v4() })),
    );
    h.say("go somewhere else").await;

    let run = h.wait_settled(alpha, 1).await.remove(0);
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.metadata.actions.tool_calls[0].is_error);
    assert_eq!(run.active_space_id, Some(h.space));
    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scheduled_plan_creates_a_plan_run() {
    let h = Harness::start(&["alpha"]).await;
    let alpha = h.agent(0);
    let plan = Plan::builder()
        .agent_entity_id(alpha)
        .name("digest")
        .instructions("summarize the day")
        .space_id(h.space)
        .schedule(Schedule::Once {
            delay: Duration::from_millis(20),
        })
        .build();
    let plan_id = h.runtime.schedule_plan(plan).unwrap();

    let run = h.wait_settled(alpha, 1).await.remove(0);
    match &run.trigger {
        TriggerContext::Plan {
            plan_id: fired,
            instructions,
            ..
        } => {
            assert_eq!(*fired, plan_id);
            assert_eq!(instructions, "summarize the day");
        }
        other => panic!("expected a plan trigger, got {other:?}"),
    }
    assert_eq!(run.active_space_id, Some(h.space));
    // A one-shot plan is gone once it has fired.
    assert!(!h.runtime.cancel_plan(plan_id));
    h.runtime.shutdown().await;
}

#[tokio::test]
async fn plans_and_services_reject_unknown_agents() {
    let h = Harness::build(config_for(&["alpha"]));
    let stranger = uuid::Uuid::new_v4();
    let plan = Plan::builder()
        .agent_entity_id(stranger)
        .name("nothing")
        .instructions("never runs")
        .schedule(Schedule::Once {
            delay: Duration::from_secs(1),
        })
        .build();
    assert!(h.runtime.schedule_plan(plan).is_err());
    assert!(!h.runtime.cancel_plan(uuid::Uuid::new_v4()));

    let err = h
        .runtime
        .trigger_service(stranger, "tickets", json!({}), None)
        .await
        .unwrap_err();
    assert!(err.is_precondition());
}
