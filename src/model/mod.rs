//! Model invoker seam.
//!
//! The model call is opaque to the runtime: a streaming generator of text,
//! reasoning and tool-call events. Providers live outside this crate.

mod scripted;

pub use scripted::{Fallback, ScriptedModel, ScriptedTurn};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{EntityId, ModelMessage, RunId, SpaceId, ToolCall, Usage};

/// Tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One model turn.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub run_id: RunId,
    pub agent_entity_id: EntityId,
    /// Space `send_message` defaults to.
    pub active_space_id: Option<SpaceId>,
    pub turn: u32,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolSpec>,
}

/// Streaming output of a model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    ReasoningDelta(String),
    /// A tool call began; arguments follow as raw JSON fragments.
    ToolInputStart { id: String, name: String },
    ToolInputDelta { id: String, delta: String },
    /// Arguments are complete.
    ToolCall(ToolCall),
    Finish { usage: Usage },
}

#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Start a turn.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>>;
}
