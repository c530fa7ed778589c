//! Space-level and tool-worker publishing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::{keys, Bus};
use crate::types::{RunId, SpaceEvent, SpaceEventKind, SpaceId, SpaceMessage};

impl SpaceEvent {
    /// The `space.message` event for a persisted message.
    pub fn from_message(message: &SpaceMessage) -> Self {
        Self {
            space_id: message.space_id,
            kind: SpaceEventKind::Message,
            seq: Some(message.seq),
            payload: serde_json::to_value(message).unwrap_or_default(),
            created_at: message.created_at,
        }
    }

    /// Decode the message carried by a `space.message` or `message.updated` event.
    pub fn message(&self) -> Option<SpaceMessage> {
        match self.kind {
            SpaceEventKind::Message | SpaceEventKind::MessageUpdated => {
                serde_json::from_value(self.payload.clone()).ok()
            }
            _ => None,
        }
    }
}

/// A client-confirmed call broadcast on `tools:calls` for external workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub run_id: RunId,
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(
        run_id: RunId,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            kind: "tool.call".into(),
            run_id,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        }
    }
}

/// Publishes space events. Failures are logged, never returned: the
/// message table is the durable source for spaces.
#[derive(Clone)]
pub struct SpacePublisher {
    bus: Arc<dyn Bus>,
}

impl SpacePublisher {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub async fn publish(&self, event: SpaceEvent) {
        let channel = keys::space(event.space_id);
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(space_id = %event.space_id, error = %e, "unserializable space event");
                return;
            }
        };
        if let Err(e) = self.bus.publish(&channel, payload).await {
            tracing::warn!(space_id = %event.space_id, kind = %event.kind, error = %e, "space publish failed");
        }
    }

    pub async fn message(&self, message: &SpaceMessage) {
        self.publish(SpaceEvent::from_message(message)).await;
    }

    pub async fn message_updated(&self, message: &SpaceMessage) {
        let mut event = SpaceEvent::from_message(message);
        event.kind = SpaceEventKind::MessageUpdated;
        self.publish(event).await;
    }

    pub async fn emit(&self, space_id: SpaceId, kind: SpaceEventKind, payload: serde_json::Value) {
        self.publish(SpaceEvent::new(space_id, kind, payload)).await;
    }

    /// Announce a client-confirmed call to out-of-process workers.
    pub async fn tool_call(&self, request: &ToolCallRequest) {
        let payload = serde_json::to_value(request).unwrap_or_default();
        if let Err(e) = self.bus.publish(keys::TOOL_CALLS, payload).await {
            tracing::warn!(run_id = %request.run_id, tool = %request.tool_name, error = %e, "tool call broadcast failed");
        }
    }
}
