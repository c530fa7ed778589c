//! The model and tool loop of one run.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::context;
use super::intent::{self, IntentOutcome};
use super::scope::RunScope;
use super::state::Lifecycle;
use super::tool_phase::{ToolCallTracker, ToolDisplayWriter};
use crate::config::AgentDefinition;
use crate::error::{AgoraError, ErrorCategory, Result};
use crate::events::{EventEmitter, SegmentAssembler, ToolCallRequest};
use crate::model::{ModelEvent, ModelRequest};
use crate::services::Services;
use crate::store::Transition;
use crate::tools::{validate_arguments, ToolArguments, ToolContext, ToolExecution};
use crate::types::{
    EntityEventKind, EntityId, ModelMessage, PendingToolCall, Run, RunEventKind, RunId,
    RunPatch, RunStatus, SpaceEventKind, SpaceMessage, ToolCall, ToolCallRecord,
    TriggerContext, Usage,
};

const STOPPED_REASON: &str = "agent process stopped";

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Suspended in `waiting_tool`.
    Suspended,
    Failed,
    Canceled,
    /// Another writer moved the run first; this execution stopped without
    /// touching it further.
    Halted,
}

/// What one model turn produced.
struct TurnOutput {
    text: String,
    calls: Vec<ToolCall>,
    usage: Usage,
    tracker: ToolCallTracker,
}

/// Result of a single tool call.
enum CallOutcome {
    Done {
        result: serde_json::Value,
        is_error: bool,
    },
    Pending(PendingToolCall),
}

/// Working state of an execution.
struct Session {
    run: Run,
    agent: AgentDefinition,
    emitter: EventEmitter,
    scope: Arc<RunScope>,
    messages: Vec<ModelMessage>,
}

/// Creates runs and drives them through the model and tool loop.
#[derive(Clone)]
pub struct RunExecutor {
    services: Arc<Services>,
}

impl RunExecutor {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Persist a queued run for a trigger.
    pub async fn start(&self, agent_entity_id: EntityId, trigger: TriggerContext) -> Result<Run> {
        let agent = self.services.agent(agent_entity_id)?;
        let run = Run::queued(agent_entity_id, agent.agent_id, trigger);
        self.services.store.insert_run(run.clone()).await?;
        self.services
            .entities
            .publish(
                agent_entity_id,
                EntityEventKind::RunCreated,
                json!({ "runId": run.id, "trigger": run.trigger.kind() }),
            )
            .await;
        tracing::info!(run_id = %run.id, agent = %agent.name, trigger = %run.trigger.kind(), "run created");
        Ok(run)
    }

    /// Claim a queued run and drive it.
    pub async fn execute(&self, run_id: RunId, cancel: CancellationToken) -> Result<RunOutcome> {
        let emitter = self.services.open_emitter(run_id).await?;
        let trigger_kind = self.services.store.require_run(run_id).await?.trigger.kind();
        let transition = Lifecycle::new(&self.services, &emitter)
            .start(&trigger_kind.to_string())
            .await?;
        let Transition::Applied(run) = transition else {
            return Ok(RunOutcome::Halted);
        };

        let agent = match self.services.agent(run.agent_entity_id) {
            Ok(agent) => agent,
            Err(e) => {
                Lifecycle::new(&self.services, &emitter)
                    .fail(&e.to_string(), None)
                    .await?;
                return Ok(RunOutcome::Failed);
            }
        };
        let messages = context::initial_messages(&agent, &run.trigger);
        let session = Session {
            scope: Arc::new(RunScope::new(run.active_space_id)),
            run,
            agent,
            emitter,
            messages,
        };
        self.drive_with_presence(session, cancel).await
    }

    /// Continue a suspended run whose pending calls are all answered.
    ///
    /// Duplicate resume requests are harmless: only one caller wins the
    /// `waiting_tool -> running` transition.
    pub async fn resume(&self, run_id: RunId, cancel: CancellationToken) -> Result<RunOutcome> {
        let run = self.services.store.require_run(run_id).await?;
        if run.status != RunStatus::WaitingTool || !run.pending_fully_answered() {
            tracing::debug!(run_id = %run_id, status = %run.status, "resume skipped");
            return Ok(RunOutcome::Halted);
        }
        let emitter = self.services.open_emitter(run_id).await?;
        let results = run.metadata.tool_results.len();
        let transition = Lifecycle::new(&self.services, &emitter)
            .resume(results)
            .await?;
        let Transition::Applied(mut run) = transition else {
            return Ok(RunOutcome::Halted);
        };

        let agent = match self.services.agent(run.agent_entity_id) {
            Ok(agent) => agent,
            Err(e) => {
                Lifecycle::new(&self.services, &emitter)
                    .fail(&e.to_string(), None)
                    .await?;
                return Ok(RunOutcome::Failed);
            }
        };

        let writer = ToolDisplayWriter::new(&self.services, run.id, run.agent_entity_id);
        for call in run.metadata.pending_tool_calls.clone() {
            let result = run
                .metadata
                .tool_results
                .get(&call.tool_call_id)
                .cloned()
                .unwrap_or_default();
            emitter
                .emit(
                    RunEventKind::ToolOutputAvailable,
                    json!({
                        "toolCallId": call.tool_call_id,
                        "toolName": call.tool_name,
                        "output": result,
                        "isError": false,
                    }),
                )
                .await?;
            if let Some(message_id) = call.display_message_id {
                if let Err(e) = writer.complete(message_id, &result, false).await {
                    tracing::warn!(run_id = %run.id, tool_call_id = %call.tool_call_id, error = %e, "display finalize failed");
                }
            }
            run.metadata.actions.tool_calls.push(ToolCallRecord {
                tool_call_id: call.tool_call_id,
                tool_name: call.tool_name,
                arguments: call.arguments,
                result: Some(result),
                is_error: false,
            });
        }

        let messages =
            context::resume_messages(&agent, &run, self.services.config.runs.resume_excerpt_chars);
        run.metadata.pending_tool_calls.clear();
        run.metadata.tool_results.clear();
        run.metadata.transcript.clear();

        let session = Session {
            scope: Arc::new(RunScope::new(run.active_space_id)),
            run,
            agent,
            emitter,
            messages,
        };
        self.drive_with_presence(session, cancel).await
    }

    async fn drive_with_presence(
        &self,
        session: Session,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let run_id = session.run.id;
        let agent_entity_id = session.run.agent_entity_id;
        let space = session.scope.active_space();
        let scope = session.scope.clone();
        let presence = json!({ "entityId": agent_entity_id, "runId": run_id });

        if let Some(space_id) = space {
            self.services
                .spaces
                .emit(space_id, SpaceEventKind::AgentActive, presence.clone())
                .await;
        }
        let outcome = self.drive(session, cancel).await;
        if let Some(space_id) = scope.active_space().or(space) {
            self.services
                .spaces
                .emit(space_id, SpaceEventKind::AgentInactive, presence)
                .await;
        }
        match &outcome {
            Ok(outcome) => tracing::info!(run_id = %run_id, ?outcome, "run execution ended"),
            Err(e) => tracing::error!(run_id = %run_id, error = %e, "run execution aborted"),
        }
        outcome
    }

    async fn drive(&self, mut s: Session, cancel: CancellationToken) -> Result<RunOutcome> {
        let max_turns = s
            .agent
            .max_turns
            .unwrap_or(self.services.config.runs.max_turns);

        loop {
            if cancel.is_cancelled() {
                return self.stop(&s).await;
            }
            if !self.checkpoint(&mut s).await? {
                return Ok(RunOutcome::Halted);
            }
            if s.run.metadata.turns >= max_turns {
                let error = format!("exceeded {max_turns} model turns");
                return self.fail(&mut s, &error).await;
            }
            s.run.metadata.turns += 1;

            let turn = match self.model_turn(&mut s, &cancel).await {
                Ok(Some(turn)) => turn,
                Ok(None) => return self.stop(&s).await,
                Err(e) => return self.fail(&mut s, &e.to_string()).await,
            };
            s.run.metadata.usage.merge(&turn.usage);
            s.messages.push(ModelMessage::assistant_turn(
                turn.text.clone(),
                turn.calls.clone(),
            ));

            if turn.calls.is_empty() {
                return self.complete(&mut s, &turn.text).await;
            }

            let mut tracker = turn.tracker;
            let mut pending = Vec::new();
            for call in &turn.calls {
                let display = tracker.take_display(&call.id);
                match self.run_call(&mut s, call, display).await {
                    Ok(CallOutcome::Done { result, is_error }) => {
                        s.messages
                            .push(ModelMessage::tool_result(call.id.clone(), result, is_error));
                        if !self.checkpoint(&mut s).await? {
                            return Ok(RunOutcome::Halted);
                        }
                    }
                    Ok(CallOutcome::Pending(call)) => pending.push(call),
                    Err(e) => return self.fail(&mut s, &e.to_string()).await,
                }
            }
            let intents = s.scope.take_intents();
            let mut absorbed = std::mem::take(&mut s.run.metadata.absorbed);
            let outcome =
                intent::interpret(&self.services, &s.emitter, &s.run, intents, &mut absorbed).await;
            s.run.metadata.absorbed = absorbed;
            match outcome? {
                IntentOutcome::Continue => {}
                IntentOutcome::HandedOff { .. } => return Ok(RunOutcome::Canceled),
                IntentOutcome::Halted => return Ok(RunOutcome::Halted),
            }

            if !pending.is_empty() {
                return self.suspend(&mut s, pending).await;
            }
        }
    }

    /// Persist progress while the run is still running. `false` means
    /// another writer moved it and this execution must stop.
    async fn checkpoint(&self, s: &mut Session) -> Result<bool> {
        collect_sent(s);
        let metadata = s.run.metadata.clone();
        let active_space_id = s.scope.active_space();
        let transition = self
            .services
            .store
            .update_run_where(
                s.run.id,
                &[RunStatus::Running],
                Box::new(move |run| {
                    run.metadata = metadata;
                    if active_space_id.is_some() {
                        run.active_space_id = active_space_id;
                    }
                }),
            )
            .await?;
        match transition {
            Transition::Applied(run) => {
                s.run.active_space_id = run.active_space_id;
                Ok(true)
            }
            Transition::Rejected { current } => {
                tracing::info!(run_id = %s.run.id, status = %current, "run moved by another writer; halting");
                Ok(false)
            }
        }
    }

    /// Stream one model turn. `None` when the cancel token fired.
    async fn model_turn(
        &self,
        s: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnOutput>> {
        let request = ModelRequest {
            run_id: s.run.id,
            agent_entity_id: s.run.agent_entity_id,
            active_space_id: s.scope.active_space(),
            turn: s.run.metadata.turns,
            messages: s.messages.clone(),
            tools: self.services.tools.specs_for(&s.agent),
        };
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            stream = self.services.model.stream(request) => stream?,
        };

        let writer = ToolDisplayWriter::new(&self.services, s.run.id, s.run.agent_entity_id);
        let mut segments = SegmentAssembler::default();
        let mut tracker = ToolCallTracker::default();
        let mut calls = Vec::new();
        let mut usage = Usage::default();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                next = stream.next() => next,
            };
            let Some(event) = next else { break };
            match event? {
                ModelEvent::TextDelta(delta) => segments.text(&s.emitter, &delta).await?,
                ModelEvent::ReasoningDelta(delta) => segments.reasoning(&s.emitter, &delta).await?,
                ModelEvent::ToolInputStart { id, name } => {
                    s.emitter
                        .emit(
                            RunEventKind::ToolInputStart,
                            json!({ "toolCallId": id, "toolName": name }),
                        )
                        .await?;
                    let display = self.open_display(s, &writer, &id, &name).await;
                    tracker.begin(&id, &name, display);
                }
                ModelEvent::ToolInputDelta { id, delta } => {
                    s.emitter
                        .emit(
                            RunEventKind::ToolInputDelta,
                            json!({ "toolCallId": id, "delta": delta }),
                        )
                        .await?;
                    if let Some(snapshot) = tracker.push(&id, &delta) {
                        let display = tracker.get(&id).and_then(|call| call.display.clone());
                        if let Some(display) = display {
                            writer.input_delta(&display, &id, &snapshot).await;
                        }
                    }
                }
                ModelEvent::ToolCall(call) => calls.push(call),
                ModelEvent::Finish { usage: turn_usage } => usage.merge(&turn_usage),
            }
        }

        let text = segments.finish(&s.emitter).await?;
        tracing::debug!(
            run_id = %s.run.id,
            turn = s.run.metadata.turns,
            tool_calls = calls.len(),
            text_len = text.len(),
            "model turn complete"
        );
        Ok(Some(TurnOutput {
            text,
            calls,
            usage,
            tracker,
        }))
    }

    /// Open a display message for a visible tool in the active space.
    async fn open_display(
        &self,
        s: &Session,
        writer: &ToolDisplayWriter<'_>,
        call_id: &str,
        name: &str,
    ) -> Option<SpaceMessage> {
        let visible = self
            .services
            .tools
            .resolve(&s.agent, name)
            .is_some_and(|tool| tool.is_visible());
        let space_id = s.scope.active_space()?;
        if !visible {
            return None;
        }
        match writer.open(space_id, call_id, name).await {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(run_id = %s.run.id, tool_call_id = call_id, error = %e, "display message not created");
                None
            }
        }
    }

    async fn run_call(
        &self,
        s: &mut Session,
        call: &ToolCall,
        display: Option<SpaceMessage>,
    ) -> Result<CallOutcome> {
        s.emitter
            .emit(
                RunEventKind::ToolInputAvailable,
                json!({ "toolCallId": call.id, "toolName": call.name, "input": call.arguments }),
            )
            .await?;

        let writer = ToolDisplayWriter::new(&self.services, s.run.id, s.run.agent_entity_id);
        let display = match display {
            Some(display) => Some(display),
            None => self.open_display(s, &writer, &call.id, &call.name).await,
        };
        if let Some(display) = &display {
            if let Err(e) = writer.input_available(display.id, &call.arguments).await {
                tracing::warn!(run_id = %s.run.id, tool_call_id = %call.id, error = %e, "display update failed");
            }
        }

        let checked = match self.services.tools.resolve(&s.agent, &call.name) {
            None => Err(AgoraError::InvalidArgument(format!(
                "unknown tool {}",
                call.name
            ))),
            Some(tool) => validate_arguments(&call.arguments, &tool.parameters().schema).map(|()| tool),
        };

        let (result, is_error) = match checked {
            Err(e) => (json!({ "error": e.to_string() }), true),
            Ok(tool) if tool.execution() == ToolExecution::Client => {
                if let Some(display) = &display {
                    if let Err(e) = writer.requires_action(display.id, &call.arguments).await {
                        tracing::warn!(run_id = %s.run.id, tool_call_id = %call.id, error = %e, "display update failed");
                    }
                }
                self.services
                    .spaces
                    .tool_call(&ToolCallRequest::new(
                        s.run.id,
                        call.id.clone(),
                        call.name.clone(),
                        call.arguments.clone(),
                    ))
                    .await;
                s.emitter
                    .emit(
                        RunEventKind::ToolRequiresAction,
                        json!({ "toolCallId": call.id, "toolName": call.name, "input": call.arguments }),
                    )
                    .await?;
                return Ok(CallOutcome::Pending(PendingToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    display_message_id: display.map(|message| message.id),
                }));
            }
            Ok(tool) => {
                let ctx = ToolContext {
                    run_id: s.run.id,
                    agent_entity_id: s.run.agent_entity_id,
                    tool_call_id: call.id.clone(),
                    services: self.services.clone(),
                    scope: s.scope.clone(),
                };
                let args = ToolArguments::new(call.arguments.clone());
                match tool.execute(&args, &ctx).await {
                    Ok(value) => (value, false),
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => {
                        tracing::debug!(run_id = %s.run.id, tool = %call.name, error = %e, "tool returned an error");
                        (json!({ "error": e.to_string() }), true)
                    }
                }
            }
        };

        s.emitter
            .emit(
                RunEventKind::ToolOutputAvailable,
                json!({
                    "toolCallId": call.id,
                    "toolName": call.name,
                    "output": result,
                    "isError": is_error,
                }),
            )
            .await?;
        if let Some(display) = &display {
            if let Err(e) = writer.complete(display.id, &result, is_error).await {
                tracing::warn!(run_id = %s.run.id, tool_call_id = %call.id, error = %e, "display finalize failed");
            }
        }
        s.run.metadata.actions.tool_calls.push(ToolCallRecord {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: Some(result.clone()),
            is_error,
        });
        Ok(CallOutcome::Done { result, is_error })
    }

    async fn suspend(&self, s: &mut Session, pending: Vec<PendingToolCall>) -> Result<RunOutcome> {
        collect_sent(s);
        let mut metadata = s.run.metadata.clone();
        metadata.pending_tool_calls = pending;
        metadata.tool_results.clear();
        metadata.transcript = s.messages.clone();
        let transition = Lifecycle::new(&self.services, &s.emitter)
            .suspend(metadata)
            .await?;
        Ok(match transition {
            Transition::Applied(_) => RunOutcome::Suspended,
            Transition::Rejected { .. } => RunOutcome::Halted,
        })
    }

    async fn complete(&self, s: &mut Session, text: &str) -> Result<RunOutcome> {
        collect_sent(s);
        let transition = Lifecycle::new(&self.services, &s.emitter)
            .complete(s.run.metadata.clone(), text)
            .await?;
        if !transition.is_applied() {
            return Ok(RunOutcome::Halted);
        }
        Ok(RunOutcome::Completed)
    }

    async fn fail(&self, s: &mut Session, error: &str) -> Result<RunOutcome> {
        collect_sent(s);
        tracing::warn!(run_id = %s.run.id, error, "run failed");
        let transition = Lifecycle::new(&self.services, &s.emitter)
            .fail(error, Some(s.run.metadata.clone()))
            .await?;
        Ok(match transition {
            Transition::Applied(_) => RunOutcome::Failed,
            Transition::Rejected { .. } => RunOutcome::Halted,
        })
    }

    /// Cancel the run because its agent process is stopping.
    async fn stop(&self, s: &Session) -> Result<RunOutcome> {
        let transition = Lifecycle::new(&self.services, &s.emitter)
            .cancel(&[RunStatus::Running], RunPatch::canceled(STOPPED_REASON))
            .await?;
        Ok(match transition {
            Transition::Applied(_) => RunOutcome::Canceled,
            Transition::Rejected { .. } => RunOutcome::Halted,
        })
    }
}

fn collect_sent(s: &mut Session) {
    let sent = s.scope.take_sent();
    s.run.metadata.actions.messages_sent.extend(sent);
}

/// Errors that end the run instead of going back to the model.
fn is_fatal(error: &AgoraError) -> bool {
    matches!(
        error.category(),
        ErrorCategory::Storage | ErrorCategory::Serialization | ErrorCategory::Configuration
    )
}
