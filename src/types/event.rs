//! Run, space and entity events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{EntityId, RunId, SpaceId};

/// Kind of a per-run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum RunEventKind {
    #[serde(rename = "run.started")]
    #[strum(serialize = "run.started")]
    RunStarted,
    #[serde(rename = "run.resumed")]
    #[strum(serialize = "run.resumed")]
    RunResumed,
    #[serde(rename = "run.waiting_tool")]
    #[strum(serialize = "run.waiting_tool")]
    RunWaitingTool,
    #[serde(rename = "run.completed")]
    #[strum(serialize = "run.completed")]
    RunCompleted,
    #[serde(rename = "run.failed")]
    #[strum(serialize = "run.failed")]
    RunFailed,
    #[serde(rename = "run.canceled")]
    #[strum(serialize = "run.canceled")]
    RunCanceled,
    #[serde(rename = "text.delta")]
    #[strum(serialize = "text.delta")]
    TextDelta,
    #[serde(rename = "text.done")]
    #[strum(serialize = "text.done")]
    TextDone,
    #[serde(rename = "reasoning.delta")]
    #[strum(serialize = "reasoning.delta")]
    ReasoningDelta,
    #[serde(rename = "reasoning.done")]
    #[strum(serialize = "reasoning.done")]
    ReasoningDone,
    #[serde(rename = "tool.input.start")]
    #[strum(serialize = "tool.input.start")]
    ToolInputStart,
    #[serde(rename = "tool.input.delta")]
    #[strum(serialize = "tool.input.delta")]
    ToolInputDelta,
    #[serde(rename = "tool.input.available")]
    #[strum(serialize = "tool.input.available")]
    ToolInputAvailable,
    #[serde(rename = "tool.requires_action")]
    #[strum(serialize = "tool.requires_action")]
    ToolRequiresAction,
    #[serde(rename = "tool.output.available")]
    #[strum(serialize = "tool.output.available")]
    ToolOutputAvailable,
}

impl RunEventKind {
    /// High-frequency kinds that are streamed live but never persisted.
    pub fn is_delta(self) -> bool {
        matches!(
            self,
            Self::TextDelta | Self::ReasoningDelta | Self::ToolInputDelta
        )
    }

    /// Kinds that end a run's event stream.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::RunCompleted | Self::RunFailed | Self::RunCanceled
        )
    }
}

/// An ordered entry of a run's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: RunEventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Lightweight notification published on `run:{id}:notify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunNotification {
    #[serde(rename = "type")]
    pub kind: RunEventKind,
    pub seq: u64,
}

/// Kind of a space-level event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum SpaceEventKind {
    #[serde(rename = "space.message")]
    #[strum(serialize = "space.message")]
    Message,
    #[serde(rename = "message.updated")]
    #[strum(serialize = "message.updated")]
    MessageUpdated,
    #[serde(rename = "tool.started")]
    #[strum(serialize = "tool.started")]
    ToolStarted,
    #[serde(rename = "tool.input.delta")]
    #[strum(serialize = "tool.input.delta")]
    ToolInputDelta,
    #[serde(rename = "tool.requires_action")]
    #[strum(serialize = "tool.requires_action")]
    ToolRequiresAction,
    #[serde(rename = "tool.done")]
    #[strum(serialize = "tool.done")]
    ToolDone,
    #[serde(rename = "agent.active")]
    #[strum(serialize = "agent.active")]
    AgentActive,
    #[serde(rename = "agent.inactive")]
    #[strum(serialize = "agent.inactive")]
    AgentInactive,
}

/// An event published on `space:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceEvent {
    pub space_id: SpaceId,
    #[serde(rename = "type")]
    pub kind: SpaceEventKind,
    /// Message seq for `space.message`; absent for transient events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SpaceEvent {
    pub fn new(space_id: SpaceId, kind: SpaceEventKind, payload: serde_json::Value) -> Self {
        Self {
            space_id,
            kind,
            seq: None,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Kind of a per-entity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum EntityEventKind {
    #[serde(rename = "inbox.received")]
    #[strum(serialize = "inbox.received")]
    InboxReceived,
    #[serde(rename = "run.created")]
    #[strum(serialize = "run.created")]
    RunCreated,
    #[serde(rename = "run.finished")]
    #[strum(serialize = "run.finished")]
    RunFinished,
}

/// An event on an entity's own stream `entity:{id}:events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub entity_id: EntityId,
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: EntityEventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn only_streaming_kinds_are_deltas() {
        assert!(RunEventKind::TextDelta.is_delta());
        assert!(RunEventKind::ToolInputDelta.is_delta());
        assert!(!RunEventKind::TextDone.is_delta());
        assert!(!RunEventKind::ToolInputAvailable.is_delta());
    }

    #[test]
    fn kinds_use_dotted_names() {
        assert_eq!(RunEventKind::RunWaitingTool.to_string(), "run.waiting_tool");
        assert_eq!(
            RunEventKind::from_str("tool.output.available").unwrap(),
            RunEventKind::ToolOutputAvailable
        );
        let note = RunNotification {
            kind: RunEventKind::TextDelta,
            seq: 4,
        };
        assert_eq!(
            serde_json::to_value(note).unwrap(),
            serde_json::json!({"type": "text.delta", "seq": 4})
        );
        assert_eq!(SpaceEventKind::Message.to_string(), "space.message");
    }
}
