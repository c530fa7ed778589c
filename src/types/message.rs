//! Space messages and tool display metadata.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::{EntityId, MessageId, RunId, SpaceId};

/// Role of a message in a space timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageRole {
    /// Posted by a human participant.
    User,
    /// Posted by an agent through `send_message`.
    Assistant,
    /// Display message for a visible tool call.
    Tool,
    System,
}

/// An immutable entry in a space timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceMessage {
    pub id: MessageId,
    pub space_id: SpaceId,
    pub seq: i64,
    pub entity_id: EntityId,
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SpaceMessage {
    /// Decoded tool display metadata, when this is a tool display message.
    pub fn tool_display(&self) -> Option<ToolDisplay> {
        self.metadata
            .get("tool")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
    }
}

/// A message waiting for a seq from the sequencer.
#[derive(Debug, Clone, Builder)]
pub struct NewMessage {
    pub space_id: SpaceId,
    pub entity_id: EntityId,
    #[builder(default = MessageRole::User)]
    pub role: MessageRole,
    #[builder(into)]
    pub content: Option<String>,
    #[builder(default = serde_json::Value::Null)]
    pub metadata: serde_json::Value,
}

impl NewMessage {
    /// Materialize with an assigned seq.
    pub fn into_message(self, seq: i64) -> SpaceMessage {
        SpaceMessage {
            id: Uuid::new_v4(),
            space_id: self.space_id,
            seq,
            entity_id: self.entity_id,
            role: self.role,
            content: self.content,
            metadata: self.metadata,
            created_at: Utc::now(),
        }
    }
}

/// A window of a space timeline.
///
/// Without `before_seq`, `limit` keeps the oldest messages after
/// `after_seq`; with it, the newest messages before `before_seq`, so a
/// client can page backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Builder)]
pub struct MessageQuery {
    #[builder(default)]
    pub after_seq: i64,
    pub before_seq: Option<i64>,
    pub limit: Option<usize>,
}

impl MessageQuery {
    /// Everything after `seq`.
    pub fn after(seq: i64) -> Self {
        Self {
            after_seq: seq,
            ..Self::default()
        }
    }
}

/// Lifecycle of a visible tool's display message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolDisplayStatus {
    Running,
    RequiresAction,
    Complete,
}

/// Tool display metadata stored under `metadata.tool` of a display message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDisplay {
    pub run_id: RunId,
    pub tool_call_id: String,
    pub tool_name: String,
    pub status: ToolDisplayStatus,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolDisplay {
    pub fn to_metadata(&self) -> serde_json::Value {
        serde_json::json!({ "tool": self })
    }
}
