//! Tool call phases and the display messages of visible tools.

use std::collections::HashMap;

use crate::error::{AgoraError, Result};
use crate::services::Services;
use crate::tools::partial_json::PartialArguments;
use crate::types::{
    EntityId, MessageId, MessageRole, NewMessage, RunId, SpaceEventKind, SpaceId, SpaceMessage,
    ToolDisplay, ToolDisplayStatus,
};

/// A call whose arguments are still streaming.
#[derive(Debug)]
pub struct StreamingCall {
    pub name: String,
    pub arguments: PartialArguments,
    /// Display message, for visible tools in a space.
    pub display: Option<SpaceMessage>,
}

/// Correlates streamed argument fragments with their call ids for one turn.
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    calls: HashMap<String, StreamingCall>,
}

impl ToolCallTracker {
    pub fn begin(&mut self, id: &str, name: &str, display: Option<SpaceMessage>) {
        self.calls.insert(
            id.to_string(),
            StreamingCall {
                name: name.to_string(),
                arguments: PartialArguments::default(),
                display,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&StreamingCall> {
        self.calls.get(id)
    }

    /// Feed a fragment; returns the new snapshot when it changed.
    pub fn push(&mut self, id: &str, fragment: &str) -> Option<serde_json::Value> {
        self.calls
            .get_mut(id)
            .and_then(|call| call.arguments.push(fragment).cloned())
    }

    /// The display message opened for a call, if any.
    pub fn take_display(&mut self, id: &str) -> Option<SpaceMessage> {
        self.calls.remove(id).and_then(|call| call.display)
    }
}

/// Renders a visible tool call as a space message.
pub struct ToolDisplayWriter<'a> {
    services: &'a Services,
    run_id: RunId,
    agent_entity_id: EntityId,
}

impl<'a> ToolDisplayWriter<'a> {
    pub fn new(services: &'a Services, run_id: RunId, agent_entity_id: EntityId) -> Self {
        Self {
            services,
            run_id,
            agent_entity_id,
        }
    }

    /// Persist a `running` display message and announce the call.
    ///
    /// Display messages never trigger other agents.
    pub async fn open(
        &self,
        space_id: SpaceId,
        tool_call_id: &str,
        tool_name: &str,
    ) -> Result<SpaceMessage> {
        let display = ToolDisplay {
            run_id: self.run_id,
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            status: ToolDisplayStatus::Running,
            args: serde_json::json!({}),
            result: None,
            is_error: false,
        };
        let message = self
            .services
            .post(
                NewMessage::builder()
                    .space_id(space_id)
                    .entity_id(self.agent_entity_id)
                    .role(MessageRole::Tool)
                    .metadata(display.to_metadata())
                    .build(),
                false,
            )
            .await?;
        self.services
            .spaces
            .emit(
                space_id,
                SpaceEventKind::ToolStarted,
                self.payload(&display, message.id),
            )
            .await;
        Ok(message)
    }

    /// Publish an argument snapshot. Live only.
    pub async fn input_delta(
        &self,
        message: &SpaceMessage,
        tool_call_id: &str,
        args: &serde_json::Value,
    ) {
        self.services
            .spaces
            .emit(
                message.space_id,
                SpaceEventKind::ToolInputDelta,
                serde_json::json!({
                    "runId": self.run_id,
                    "toolCallId": tool_call_id,
                    "messageId": message.id,
                    "args": args,
                }),
            )
            .await;
    }

    /// Record committed arguments while the call is still running.
    pub async fn input_available(
        &self,
        message_id: MessageId,
        args: &serde_json::Value,
    ) -> Result<SpaceMessage> {
        self.update(message_id, None, |display| display.args = args.clone())
            .await
    }

    /// Mark a client-confirmed call as awaiting its result.
    pub async fn requires_action(
        &self,
        message_id: MessageId,
        args: &serde_json::Value,
    ) -> Result<SpaceMessage> {
        self.update(
            message_id,
            Some(SpaceEventKind::ToolRequiresAction),
            |display| {
                display.status = ToolDisplayStatus::RequiresAction;
                display.args = args.clone();
            },
        )
        .await
    }

    /// Finalize a call with its result.
    pub async fn complete(
        &self,
        message_id: MessageId,
        result: &serde_json::Value,
        is_error: bool,
    ) -> Result<SpaceMessage> {
        self.update(message_id, Some(SpaceEventKind::ToolDone), |display| {
            display.status = ToolDisplayStatus::Complete;
            display.result = Some(result.clone());
            display.is_error = is_error;
        })
        .await
    }

    async fn update(
        &self,
        message_id: MessageId,
        announce: Option<SpaceEventKind>,
        change: impl FnOnce(&mut ToolDisplay),
    ) -> Result<SpaceMessage> {
        let stored = self
            .services
            .store
            .get_message(message_id)
            .await?
            .and_then(|message| message.tool_display());
        let Some(mut shown) = stored else {
            return Err(AgoraError::InvalidArgument(format!(
                "message {message_id} is not a tool display"
            )));
        };
        change(&mut shown);
        let message = self
            .services
            .store
            .update_message_metadata(message_id, shown.to_metadata())
            .await?;
        self.services.spaces.message_updated(&message).await;
        if let Some(kind) = announce {
            self.services
                .spaces
                .emit(message.space_id, kind, self.payload(&shown, message.id))
                .await;
        }
        tracing::debug!(
            run_id = %self.run_id,
            tool_call_id = %shown.tool_call_id,
            status = %shown.status,
            "tool display updated"
        );
        Ok(message)
    }

    fn payload(&self, display: &ToolDisplay, message_id: MessageId) -> serde_json::Value {
        let mut payload = serde_json::to_value(display).unwrap_or_default();
        if let Some(map) = payload.as_object_mut() {
            map.insert("messageId".into(), serde_json::json!(message_id));
        }
        payload
    }
}
