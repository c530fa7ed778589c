//! Guarded run transitions paired with their run events.
//!
//! Every status change goes through [`Store::compare_and_transition`], and
//! the matching run event is emitted only by the writer whose transition
//! was applied. A run therefore gets exactly one terminal event no matter
//! how many writers race to finish it.
//!
//! The same writer answers an expect-reply mention that started the run,
//! whatever the terminal status. Absorbed runs leave that to their absorber
//! and delegated runs leave it to their delegate.
//!
//! [`Store::compare_and_transition`]: crate::store::Store::compare_and_transition

use std::collections::HashSet;

use serde_json::json;

use crate::error::Result;
use crate::events::EventEmitter;
use crate::services::Services;
use crate::store::Transition;
use crate::types::{
    EntityEventKind, Run, RunEventKind, RunId, RunMetadata, RunPatch, RunStatus, TriggerContext,
};

use super::intent::original_trigger;

pub struct Lifecycle<'a> {
    services: &'a Services,
    emitter: &'a EventEmitter,
}

impl<'a> Lifecycle<'a> {
    pub fn new(services: &'a Services, emitter: &'a EventEmitter) -> Self {
        Self { services, emitter }
    }

    fn run_id(&self) -> RunId {
        self.emitter.run_id()
    }

    async fn transition(
        &self,
        from: &[RunStatus],
        to: RunStatus,
        patch: RunPatch,
        kind: RunEventKind,
        payload: serde_json::Value,
    ) -> Result<Transition> {
        let transition = self
            .services
            .store
            .compare_and_transition(self.run_id(), from, to, patch)
            .await?;
        match &transition {
            Transition::Applied(run) => {
                tracing::info!(run_id = %run.id, agent = %run.agent_entity_id, status = %to, "run transitioned");
                self.emitter.emit(kind, payload.clone()).await?;
                if to.is_terminal() {
                    self.services
                        .entities
                        .publish(
                            run.agent_entity_id,
                            EntityEventKind::RunFinished,
                            json!({ "runId": run.id, "status": to }),
                        )
                        .await;
                }
            }
            Transition::Rejected { current } => {
                tracing::debug!(run_id = %self.run_id(), to = %to, current = %current, "transition rejected");
            }
        }
        Ok(transition)
    }

    pub async fn start(&self, trigger_kind: &str) -> Result<Transition> {
        self.transition(
            &[RunStatus::Queued],
            RunStatus::Running,
            RunPatch::default(),
            RunEventKind::RunStarted,
            json!({ "trigger": trigger_kind }),
        )
        .await
    }

    pub async fn resume(&self, results: usize) -> Result<Transition> {
        self.transition(
            &[RunStatus::WaitingTool],
            RunStatus::Running,
            RunPatch::default(),
            RunEventKind::RunResumed,
            json!({ "toolResults": results }),
        )
        .await
    }

    /// Suspend on the pending calls recorded in `metadata`.
    pub async fn suspend(&self, metadata: RunMetadata) -> Result<Transition> {
        let pending: Vec<&str> = metadata
            .pending_tool_calls
            .iter()
            .map(|call| call.tool_call_id.as_str())
            .collect();
        let payload = json!({ "pendingToolCalls": pending });
        self.transition(
            &[RunStatus::Running],
            RunStatus::WaitingTool,
            RunPatch::default().with_metadata(metadata),
            RunEventKind::RunWaitingTool,
            payload,
        )
        .await
    }

    pub async fn complete(&self, metadata: RunMetadata, text: &str) -> Result<Transition> {
        let transition = self
            .transition(
                &[RunStatus::Running],
                RunStatus::Completed,
                RunPatch::default().with_metadata(metadata),
                RunEventKind::RunCompleted,
                json!({ "text": text }),
            )
            .await?;
        if let Transition::Applied(run) = &transition {
            let content = run
                .metadata
                .actions
                .messages_sent
                .last()
                .map(|sent| sent.content.clone())
                .unwrap_or_else(|| text.to_string());
            self.answer_mentions(run, &content).await;
        }
        Ok(transition)
    }

    /// Fail a running or suspended run.
    pub async fn fail(&self, error: &str, metadata: Option<RunMetadata>) -> Result<Transition> {
        let mut patch = RunPatch::error(error);
        patch.metadata = metadata;
        let transition = self
            .transition(
                &[RunStatus::Running, RunStatus::WaitingTool],
                RunStatus::Failed,
                patch,
                RunEventKind::RunFailed,
                json!({ "error": error }),
            )
            .await?;
        if let Transition::Applied(run) = &transition {
            self.answer_mentions(run, &format!("run failed: {error}")).await;
        }
        Ok(transition)
    }

    /// Cancel from any of `from`. An absorbed run stays silent; its absorber
    /// answers for it.
    pub async fn cancel(&self, from: &[RunStatus], patch: RunPatch) -> Result<Transition> {
        let answer = match (&patch.absorbed_by, &patch.cancel_reason) {
            (Some(_), _) => None,
            (None, Some(reason)) => Some(format!("run canceled: {reason}")),
            (None, None) => Some("run canceled".to_string()),
        };
        let transition = self.cancel_quietly(from, patch).await?;
        if let (Transition::Applied(run), Some(answer)) = (&transition, answer) {
            self.answer_mentions(run, &answer).await;
        }
        Ok(transition)
    }

    /// Cancel a running run whose trigger now belongs to another agent.
    pub async fn hand_off(&self, reason: String) -> Result<Transition> {
        self.cancel_quietly(&[RunStatus::Running], RunPatch::canceled(reason))
            .await
    }

    async fn cancel_quietly(&self, from: &[RunStatus], patch: RunPatch) -> Result<Transition> {
        let payload = json!({
            "reason": patch.cancel_reason,
            "absorbedBy": patch.absorbed_by,
        });
        self.transition(from, RunStatus::Canceled, patch, RunEventKind::RunCanceled, payload)
            .await
    }

    /// Send `Reply` triggers for the run and every run it absorbed, directly
    /// or through another donor. Delivery failures are logged.
    async fn answer_mentions(&self, run: &Run, content: &str) {
        let mut seen = HashSet::new();
        let mut pending = vec![run.clone()];
        while let Some(run) = pending.pop() {
            if !seen.insert(run.id) {
                continue;
            }
            for donor in &run.metadata.absorbed {
                match self.services.store.get_run(*donor).await {
                    Ok(Some(donor)) => pending.push(donor),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(run_id = %run.id, donor = %donor, error = %e, "absorbed run unreadable")
                    }
                }
            }
            let TriggerContext::Mention {
                space_id,
                from_entity_id,
                from_run_id: Some(from_run_id),
                expect_reply: true,
                ..
            } = original_trigger(&run.trigger)
            else {
                continue;
            };
            if let Err(e) = self
                .services
                .router
                .reply(from_entity_id, run.agent_entity_id, from_run_id, space_id, content.to_string())
                .await
            {
                tracing::warn!(run_id = %run.id, target = %from_entity_id, error = %e, "mention reply not delivered");
            }
        }
    }
}

/// Shorthand for callers that only care whether they won.
pub fn applied(transition: Transition) -> Option<Run> {
    match transition {
        Transition::Applied(run) => Some(run),
        Transition::Rejected { .. } => None,
    }
}
