//! Deterministic model used by tests and the demo binary.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use super::{ModelEvent, ModelInvoker, ModelRequest};
use crate::error::{AgoraError, Result};
use crate::types::{EntityId, Role, ToolCall, Usage};

/// Behavior when no scripted turn is queued for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fallback {
    /// Finish without output.
    #[default]
    Silent,
    /// Reply to the trigger with `send_message`, then finish.
    Echo,
}

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Events(Vec<ModelEvent>),
    /// Fail the turn with a model error.
    Fail(String),
}

impl ScriptedTurn {
    /// Plain text, streamed word by word.
    pub fn text(text: &str) -> Self {
        let mut events: Vec<ModelEvent> = split_words(text)
            .into_iter()
            .map(ModelEvent::TextDelta)
            .collect();
        events.push(finish());
        Self::Events(events)
    }

    /// A single tool call whose arguments stream in small fragments.
    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(vec![(id, name, arguments)])
    }

    /// Several tool calls in one turn.
    pub fn tool_calls(calls: Vec<(&str, &str, serde_json::Value)>) -> Self {
        let mut events = Vec::new();
        for (id, name, arguments) in calls {
            events.extend(streamed_call(id, name, arguments));
        }
        events.push(finish());
        Self::Events(events)
    }

    /// Reasoning then text.
    pub fn reasoning_then_text(reasoning: &str, text: &str) -> Self {
        let mut events = vec![ModelEvent::ReasoningDelta(reasoning.to_string())];
        events.extend(split_words(text).into_iter().map(ModelEvent::TextDelta));
        events.push(finish());
        Self::Events(events)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

fn finish() -> ModelEvent {
    ModelEvent::Finish {
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            reasoning_tokens: None,
        },
    }
}

fn split_words(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

fn streamed_call(id: &str, name: &str, arguments: serde_json::Value) -> Vec<ModelEvent> {
    let raw = arguments.to_string();
    let chars: Vec<char> = raw.chars().collect();
    let mut events = vec![ModelEvent::ToolInputStart {
        id: id.to_string(),
        name: name.to_string(),
    }];
    events.extend(chars.chunks(7).map(|chunk| ModelEvent::ToolInputDelta {
        id: id.to_string(),
        delta: chunk.iter().collect(),
    }));
    events.push(ModelEvent::ToolCall(ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }));
    events
}

#[derive(Default)]
struct Script {
    by_agent: HashMap<EntityId, VecDeque<ScriptedTurn>>,
    shared: VecDeque<ScriptedTurn>,
    requests: Vec<ModelRequest>,
}

/// A [`ModelInvoker`] replaying queued turns.
///
/// Turns queued for an agent take precedence over shared turns; when both
/// are empty the [`Fallback`] decides.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<Script>,
    fallback: Fallback,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: Fallback) -> Self {
        Self {
            script: Mutex::default(),
            fallback,
        }
    }

    /// Queue a turn for one agent.
    pub fn push(&self, agent_entity_id: EntityId, turn: ScriptedTurn) {
        if let Ok(mut script) = self.script.lock() {
            script.by_agent.entry(agent_entity_id).or_default().push_back(turn);
        }
    }

    /// Queue a turn for whichever agent asks next.
    pub fn push_shared(&self, turn: ScriptedTurn) {
        if let Ok(mut script) = self.script.lock() {
            script.shared.push_back(turn);
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.script
            .lock()
            .map(|script| script.requests.clone())
            .unwrap_or_default()
    }

    /// Requests made on behalf of one agent.
    pub fn requests_for(&self, agent_entity_id: EntityId) -> Vec<ModelRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.agent_entity_id == agent_entity_id)
            .collect()
    }

    fn fallback_turn(&self, request: &ModelRequest) -> ScriptedTurn {
        let replied = request
            .messages
            .iter()
            .any(|m| m.role == Role::Tool);
        match self.fallback {
            Fallback::Echo if !replied => {
                let heard = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.text())
                    .unwrap_or_default();
                let heard = heard.lines().last().unwrap_or_default().to_string();
                ScriptedTurn::tool_call(
                    &format!("echo_{}", request.turn),
                    "send_message",
                    serde_json::json!({ "text": format!("echo: {heard}") }),
                )
            }
            _ => ScriptedTurn::Events(vec![finish()]),
        }
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let queued = {
            let mut script = self
                .script
                .lock()
                .map_err(|_| AgoraError::Model("script lock poisoned".into()))?;
            script.requests.push(request.clone());
            let agent = request.agent_entity_id;
            script
                .by_agent
                .get_mut(&agent)
                .and_then(VecDeque::pop_front)
                .or_else(|| script.shared.pop_front())
        };
        let turn = queued.unwrap_or_else(|| self.fallback_turn(&request));
        match turn {
            ScriptedTurn::Events(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            ScriptedTurn::Fail(message) => Err(AgoraError::Model(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelMessage;
    use futures::TryStreamExt;
    use uuid::Uuid;

    fn request(agent: EntityId, messages: Vec<ModelMessage>) -> ModelRequest {
        ModelRequest {
            run_id: Uuid::new_v4(),
            agent_entity_id: agent,
            active_space_id: None,
            turn: 1,
            messages,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn agent_turns_take_precedence_over_shared() {
        let model = ScriptedModel::new();
        let agent = Uuid::new_v4();
        model.push_shared(ScriptedTurn::text("shared"));
        model.push(agent, ScriptedTurn::text("mine"));

        let events: Vec<ModelEvent> = model
            .stream(request(agent, vec![]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(events[0], ModelEvent::TextDelta("mine".into()));
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn streamed_call_fragments_reassemble_to_arguments() {
        let args = serde_json::json!({"text": "hello there", "space_id": null});
        let ScriptedTurn::Events(events) = ScriptedTurn::tool_call("c1", "send_message", args.clone())
        else {
            panic!("expected events");
        };
        let joined: String = events
            .iter()
            .filter_map(|e| match e {
                ModelEvent::ToolInputDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&joined).unwrap(), args);
    }

    #[tokio::test]
    async fn echo_fallback_replies_once() {
        let model = ScriptedModel::with_fallback(Fallback::Echo);
        let agent = Uuid::new_v4();
        let events: Vec<ModelEvent> = model
            .stream(request(agent, vec![ModelMessage::user("ping")]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ModelEvent::ToolCall(call) if call.arguments["text"] == "echo: ping"
        )));

        let after_reply = request(
            agent,
            vec![
                ModelMessage::user("ping"),
                ModelMessage::tool_result("echo_1", serde_json::json!({"ok": true}), false),
            ],
        );
        let events: Vec<ModelEvent> = model
            .stream(after_reply)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }
}
