//! Participants in a space.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{AgentId, EntityId};

/// Kind of participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Human,
    Agent,
}

/// A human or agent participant with stable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub display_name: String,
    /// Agent definition owning this entity's process (agents only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

impl Entity {
    pub fn human(id: EntityId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            kind: EntityKind::Human,
            display_name: display_name.into(),
            agent_id: None,
        }
    }

    pub fn agent(id: EntityId, agent_id: AgentId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            kind: EntityKind::Agent,
            display_name: display_name.into(),
            agent_id: Some(agent_id),
        }
    }

    pub fn is_agent(&self) -> bool {
        self.kind == EntityKind::Agent
    }
}
