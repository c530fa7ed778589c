//! Completion intents produced by a model turn.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::EventEmitter;
use crate::services::Services;
use crate::store::Transition;
use crate::types::{EntityId, Run, RunId, SpaceId, TriggerContext};

use super::state::Lifecycle;

/// What a run asked for beyond its tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum CompletionIntent {
    /// Answer normally.
    Reply,
    /// Hand the run's trigger to another agent and cancel this run.
    Delegate {
        target: EntityId,
        note: Option<String>,
    },
    /// Address another agent, optionally expecting a reply trigger back.
    Mention {
        target: EntityId,
        space_id: Option<SpaceId>,
        message: String,
        expect_reply: bool,
    },
    /// A donor run was folded into this one.
    Absorb { donor: RunId },
}

/// How the run continues after its intents are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    Continue,
    /// The run was canceled in favor of another agent.
    HandedOff { target: EntityId },
    /// The run is no longer running; someone else finalized it.
    Halted,
}

/// The trigger a delegation should hand over: never a delegation wrapper.
pub fn original_trigger(trigger: &TriggerContext) -> TriggerContext {
    match trigger {
        TriggerContext::Delegation { original, .. } => original_trigger(original),
        other => other.clone(),
    }
}

/// Apply the intents of one turn, in order.
///
/// `absorbed` collects donor ids for the run's metadata.
pub async fn interpret(
    services: &Services,
    emitter: &EventEmitter,
    run: &Run,
    intents: Vec<CompletionIntent>,
    absorbed: &mut Vec<RunId>,
) -> Result<IntentOutcome> {
    for intent in intents {
        match intent {
            CompletionIntent::Reply => {}
            CompletionIntent::Absorb { donor } => {
                if !absorbed.contains(&donor) {
                    absorbed.push(donor);
                }
            }
            CompletionIntent::Mention {
                target,
                space_id,
                message,
                expect_reply,
            } => {
                if let Err(e) = services
                    .router
                    .mention(
                        target,
                        run.agent_entity_id,
                        Some(run.id),
                        space_id,
                        message,
                        expect_reply,
                    )
                    .await
                {
                    tracing::warn!(run_id = %run.id, target = %target, error = %e, "mention delivery failed");
                }
            }
            CompletionIntent::Delegate { target, note } => {
                let reason = format!("delegated to {target}");
                let transition = Lifecycle::new(services, emitter).hand_off(reason).await?;
                if let Transition::Rejected { current } = transition {
                    tracing::debug!(run_id = %run.id, status = %current, "delegation lost to a concurrent transition");
                    return Ok(IntentOutcome::Halted);
                }
                if let Err(e) = services
                    .router
                    .delegate(
                        target,
                        run.agent_entity_id,
                        run.id,
                        original_trigger(&run.trigger),
                        note,
                    )
                    .await
                {
                    tracing::error!(run_id = %run.id, target = %target, error = %e, "delegation delivery failed");
                }
                tracing::info!(run_id = %run.id, target = %target, "run delegated");
                return Ok(IntentOutcome::HandedOff { target });
            }
        }
    }
    Ok(IntentOutcome::Continue)
}
