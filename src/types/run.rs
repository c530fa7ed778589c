//! Run records and their lifecycle.

use std::collections::BTreeMap;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::{AgentId, EntityId, ModelMessage, RunId, SpaceId, TriggerContext, Usage};

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    WaitingTool,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    /// Statuses `stop_run` and `absorb_run` may cancel from.
    pub const CANCELABLE: &'static [RunStatus] =
        &[RunStatus::Queued, RunStatus::Running, RunStatus::WaitingTool];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn is_cancelable(self) -> bool {
        Self::CANCELABLE.contains(&self)
    }

    /// Whether `self -> next` is an edge of the run state machine.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Queued, Running) => true,
            (Running, WaitingTool) => true,
            (WaitingTool, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            (from, Canceled) => from.is_cancelable(),
            // A suspended run can fail when its resumption is unrecoverable.
            (WaitingTool, Failed) => true,
            _ => false,
        }
    }
}

/// One activation of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub agent_entity_id: EntityId,
    pub agent_id: AgentId,
    pub trigger: TriggerContext,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_space_id: Option<SpaceId>,
    #[serde(default)]
    pub metadata: RunMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// A fresh queued run for the given trigger.
    pub fn queued(agent_entity_id: EntityId, agent_id: AgentId, trigger: TriggerContext) -> Self {
        let active_space_id = trigger.space_id();
        Self {
            id: Uuid::new_v4(),
            agent_entity_id,
            agent_id,
            trigger,
            status: RunStatus::Queued,
            active_space_id,
            metadata: RunMetadata::default(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Pending calls that do not yet have a result.
    pub fn unanswered_calls(&self) -> Vec<&PendingToolCall> {
        self.metadata
            .pending_tool_calls
            .iter()
            .filter(|call| !self.metadata.tool_results.contains_key(&call.tool_call_id))
            .collect()
    }

    /// Whether every pending call has a result.
    pub fn pending_fully_answered(&self) -> bool {
        !self.metadata.pending_tool_calls.is_empty() && self.unanswered_calls().is_empty()
    }
}

/// Mutable bookkeeping stored alongside a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Client-confirmed calls the run is suspended on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_tool_calls: Vec<PendingToolCall>,
    /// Externally supplied results keyed by call id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_results: BTreeMap<String, serde_json::Value>,
    /// Model conversation up to the suspension point.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transcript: Vec<ModelMessage>,
    /// Turns taken so far, carried across suspension.
    #[serde(default)]
    pub turns: u32,
    #[serde(default)]
    pub actions: RunActions,
    #[serde(default)]
    pub usage: Usage,
    /// Donor runs folded into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub absorbed: Vec<RunId>,
    /// Run that absorbed this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absorbed_by: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

/// A client-confirmed tool call awaiting an external result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// Display message that is finalized when the result arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_message_id: Option<Uuid>,
}

/// Side effects a run has produced, reported by `absorb_run`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunActions {
    #[serde(default)]
    pub messages_sent: Vec<SentMessage>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

/// A tool call a run has executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// A message a run posted through `send_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: Uuid,
    pub space_id: SpaceId,
    pub seq: i64,
    pub content: String,
}

/// Summary handed to the absorbing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsorbSummary {
    pub run_id: RunId,
    pub previous_status: RunStatus,
    pub trigger: TriggerContext,
    pub messages_sent: Vec<SentMessage>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Changes applied together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub error: Option<String>,
    pub active_space_id: Option<SpaceId>,
    pub metadata: Option<RunMetadata>,
    pub cancel_reason: Option<String>,
    pub absorbed_by: Option<RunId>,
}

impl RunPatch {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn canceled(reason: impl Into<String>) -> Self {
        Self {
            cancel_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: RunMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_absorbed_by(mut self, run_id: RunId) -> Self {
        self.absorbed_by = Some(run_id);
        self
    }

    /// Apply this patch and the status change to a run.
    pub fn apply(self, run: &mut Run, to: RunStatus) {
        let now = Utc::now();
        if to == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(now);
        }
        if to.is_terminal() {
            run.completed_at = Some(now);
        }
        run.status = to;
        if let Some(metadata) = self.metadata {
            run.metadata = metadata;
        }
        if let Some(error) = self.error {
            run.error = Some(error);
        }
        if let Some(space_id) = self.active_space_id {
            run.active_space_id = Some(space_id);
        }
        if let Some(reason) = self.cancel_reason {
            run.metadata.cancel_reason = Some(reason);
        }
        if let Some(absorber) = self.absorbed_by {
            run.metadata.absorbed_by = Some(absorber);
        }
    }
}

/// Query filter for listing runs.
#[derive(Debug, Clone, Default, Builder)]
pub struct RunFilter {
    pub agent_entity_id: Option<EntityId>,
    pub agent_id: Option<AgentId>,
    pub space_id: Option<SpaceId>,
    #[builder(default)]
    pub statuses: Vec<RunStatus>,
    pub limit: Option<usize>,
    #[builder(default)]
    pub offset: usize,
}

impl RunFilter {
    pub fn matches(&self, run: &Run) -> bool {
        if let Some(agent) = self.agent_entity_id {
            if run.agent_entity_id != agent {
                return false;
            }
        }
        if let Some(agent_id) = self.agent_id {
            if run.agent_id != agent_id {
                return false;
            }
        }
        if let Some(space) = self.space_id {
            if run.trigger.space_id() != Some(space) && run.active_space_id != Some(space) {
                return false;
            }
        }
        self.statuses.is_empty() || self.statuses.contains(&run.status)
    }
}
