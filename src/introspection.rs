//! Operations on runs other than the caller's own execution: listing,
//! stopping, absorbing, and answering client-confirmed tool calls.

use serde_json::json;

use crate::error::{AgoraError, Result};
use crate::run::tool_phase::ToolDisplayWriter;
use crate::run::Lifecycle;
use crate::services::Services;
use crate::store::Transition;
use crate::types::{
    AbsorbSummary, EntityId, Run, RunFilter, RunId, RunPatch, RunStatus,
};

/// Runs of an agent, newest first.
pub async fn my_runs(
    services: &Services,
    agent_entity_id: EntityId,
    statuses: Vec<RunStatus>,
    limit: Option<usize>,
) -> Result<Vec<Run>> {
    let filter = RunFilter::builder()
        .agent_entity_id(agent_entity_id)
        .statuses(statuses)
        .maybe_limit(limit)
        .build();
    services.store.list_runs(&filter).await
}

/// Cancel any cancelable run.
///
/// Loses cleanly to a concurrent transition with `AlreadyTransitioned`.
/// Display messages of calls the run was waiting on are finalized.
pub async fn cancel_run(
    services: &Services,
    run_id: RunId,
    reason: &str,
    absorbed_by: Option<RunId>,
) -> Result<Run> {
    let emitter = services.open_emitter(run_id).await?;
    let mut patch = RunPatch::canceled(reason);
    patch.absorbed_by = absorbed_by;
    let run = Lifecycle::new(services, &emitter)
        .cancel(RunStatus::CANCELABLE, patch)
        .await?
        .into_applied(run_id)?;

    let writer = ToolDisplayWriter::new(services, run.id, run.agent_entity_id);
    for call in run.unanswered_calls() {
        let Some(message_id) = call.display_message_id else {
            continue;
        };
        let result = json!({ "error": format!("run canceled: {reason}") });
        if let Err(e) = writer.complete(message_id, &result, true).await {
            tracing::warn!(run_id = %run.id, tool_call_id = %call.tool_call_id, error = %e, "display finalize failed");
        }
    }
    Ok(run)
}

/// Stop one of the caller's other runs.
pub async fn stop_run(
    services: &Services,
    caller: EntityId,
    caller_run: RunId,
    target: RunId,
    reason: Option<&str>,
) -> Result<Run> {
    if target == caller_run {
        return Err(AgoraError::InvalidArgument(
            "a run cannot stop itself".into(),
        ));
    }
    let run = services.store.require_run(target).await?;
    if run.agent_entity_id != caller {
        return Err(AgoraError::NotOwner {
            run_id: target,
            agent_entity_id: caller,
        });
    }
    let reason = reason.unwrap_or("stopped by agent");
    cancel_run(services, target, reason, None).await
}

/// Cancel a donor run and hand its side effects to the absorbing run.
pub async fn absorb_run(
    services: &Services,
    caller: EntityId,
    absorber: RunId,
    donor: RunId,
) -> Result<AbsorbSummary> {
    if donor == absorber {
        return Err(AgoraError::InvalidArgument(
            "a run cannot absorb itself".into(),
        ));
    }
    let before = services.store.require_run(donor).await?;
    if before.agent_entity_id != caller {
        return Err(AgoraError::NotOwner {
            run_id: donor,
            agent_entity_id: caller,
        });
    }
    let run = cancel_run(services, donor, "absorbed", Some(absorber)).await?;
    tracing::info!(donor = %donor, absorber = %absorber, previous = %before.status, "run absorbed");
    Ok(AbsorbSummary {
        run_id: run.id,
        previous_status: before.status,
        trigger: run.trigger,
        messages_sent: run.metadata.actions.messages_sent,
        tool_calls: run.metadata.actions.tool_calls,
    })
}

/// Record an external result for a pending client-confirmed call.
///
/// When this answers the last outstanding call, the owning agent is asked to
/// resume. A second result for the same call is ignored.
pub async fn submit_tool_result(
    services: &Services,
    run_id: RunId,
    tool_call_id: &str,
    result: serde_json::Value,
) -> Result<Run> {
    let run = services.store.require_run(run_id).await?;
    if run.status != RunStatus::WaitingTool {
        return Err(AgoraError::NotWaiting {
            run_id,
            status: run.status,
        });
    }
    if !run
        .metadata
        .pending_tool_calls
        .iter()
        .any(|call| call.tool_call_id == tool_call_id)
    {
        return Err(AgoraError::UnknownToolCall {
            run_id,
            call_id: tool_call_id.to_string(),
        });
    }

    let call_id = tool_call_id.to_string();
    let transition = services
        .store
        .update_run_where(
            run_id,
            &[RunStatus::WaitingTool],
            Box::new(move |run| {
                run.metadata.tool_results.entry(call_id).or_insert(result);
            }),
        )
        .await?;
    let run = match transition {
        Transition::Applied(run) => run,
        Transition::Rejected { current } => {
            return Err(AgoraError::NotWaiting {
                run_id,
                status: current,
            })
        }
    };
    tracing::info!(run_id = %run_id, tool_call_id, remaining = run.unanswered_calls().len(), "tool result recorded");

    if run.pending_fully_answered() {
        // The result is stored; boot recovery resumes the run if this is lost.
        if let Err(e) = services.router.resume(run.agent_entity_id, run_id).await {
            tracing::warn!(run_id = %run_id, agent = %run.agent_entity_id, error = %e, "resume not delivered");
        }
    }
    Ok(run)
}
