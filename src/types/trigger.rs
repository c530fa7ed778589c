//! Trigger contexts: why a run was created.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::{EntityId, MessageId, MessageRole, RunId, SpaceId, SpaceMessage};

/// One line of recent space context shipped with a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextLine {
    pub seq: i64,
    pub entity_id: EntityId,
    pub role: MessageRole,
    pub content: String,
}

impl From<&SpaceMessage> for ContextLine {
    fn from(msg: &SpaceMessage) -> Self {
        Self {
            seq: msg.seq,
            entity_id: msg.entity_id,
            role: msg.role,
            content: msg.content.clone().unwrap_or_default(),
        }
    }
}

/// Discriminant of [`TriggerContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerKind {
    SpaceMessage,
    Mention,
    Reply,
    Delegation,
    Plan,
    Service,
}

/// Immutable context a run was created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerContext {
    /// A message posted in a space the agent is a member of.
    SpaceMessage {
        space_id: SpaceId,
        message_id: MessageId,
        seq: i64,
        sender_id: EntityId,
        content: String,
        #[serde(default)]
        recent: Vec<ContextLine>,
    },
    /// Another agent explicitly addressed this agent.
    Mention {
        space_id: Option<SpaceId>,
        from_entity_id: EntityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_run_id: Option<RunId>,
        message: String,
        #[serde(default)]
        expect_reply: bool,
        #[serde(default)]
        recent: Vec<ContextLine>,
    },
    /// A mentioned agent finished the work this agent asked for.
    Reply {
        space_id: Option<SpaceId>,
        from_entity_id: EntityId,
        reply_to_run_id: RunId,
        content: String,
    },
    /// A trigger handed over silently by another agent.
    Delegation {
        from_entity_id: EntityId,
        from_run_id: RunId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        original: Box<TriggerContext>,
    },
    /// A scheduled plan fired.
    Plan {
        plan_id: Uuid,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        space_id: Option<SpaceId>,
        instructions: String,
    },
    /// An external service call.
    Service {
        service_name: String,
        #[serde(default)]
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        space_id: Option<SpaceId>,
    },
}

impl TriggerContext {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::SpaceMessage { .. } => TriggerKind::SpaceMessage,
            Self::Mention { .. } => TriggerKind::Mention,
            Self::Reply { .. } => TriggerKind::Reply,
            Self::Delegation { .. } => TriggerKind::Delegation,
            Self::Plan { .. } => TriggerKind::Plan,
            Self::Service { .. } => TriggerKind::Service,
        }
    }

    /// Space the trigger originated in, following delegations.
    pub fn space_id(&self) -> Option<SpaceId> {
        match self {
            Self::SpaceMessage { space_id, .. } => Some(*space_id),
            Self::Mention { space_id, .. }
            | Self::Reply { space_id, .. }
            | Self::Plan { space_id, .. }
            | Self::Service { space_id, .. } => *space_id,
            Self::Delegation { original, .. } => original.space_id(),
        }
    }

    /// Entity that caused the trigger, if any.
    pub fn sender_id(&self) -> Option<EntityId> {
        match self {
            Self::SpaceMessage { sender_id, .. } => Some(*sender_id),
            Self::Mention { from_entity_id, .. } | Self::Reply { from_entity_id, .. } => {
                Some(*from_entity_id)
            }
            Self::Delegation { original, .. } => original.sender_id(),
            Self::Plan { .. } | Self::Service { .. } => None,
        }
    }

    /// Recent space context carried with the trigger.
    pub fn recent(&self) -> &[ContextLine] {
        match self {
            Self::SpaceMessage { recent, .. } | Self::Mention { recent, .. } => recent,
            Self::Delegation { original, .. } => original.recent(),
            _ => &[],
        }
    }

    /// One-line human readable description for prompts and logs.
    pub fn summary(&self) -> String {
        match self {
            Self::SpaceMessage { content, sender_id, .. } => {
                format!("New message from {sender_id}: {content}")
            }
            Self::Mention {
                from_entity_id,
                message,
                expect_reply,
                ..
            } => {
                let suffix = if *expect_reply { " (reply expected)" } else { "" };
                format!("Mentioned by {from_entity_id}{suffix}: {message}")
            }
            Self::Reply {
                from_entity_id,
                content,
                ..
            } => format!("Reply from {from_entity_id}: {content}"),
            Self::Delegation {
                from_entity_id,
                note,
                original,
                ..
            } => match note {
                Some(note) => format!(
                    "Delegated by {from_entity_id} ({note}). {}",
                    original.summary()
                ),
                None => format!("Delegated by {from_entity_id}. {}", original.summary()),
            },
            Self::Plan {
                name, instructions, ..
            } => format!("Scheduled plan '{name}' fired: {instructions}"),
            Self::Service {
                service_name,
                payload,
                ..
            } => format!("Service call '{service_name}': {payload}"),
        }
    }
}
