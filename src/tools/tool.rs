//! Tool trait, execution context and closure-based tools.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::types::ToolParameters;
use crate::config::ClientToolDefinition;
use crate::error::{AgoraError, Result};
use crate::run::scope::RunScope;
use crate::services::Services;
use crate::types::{EntityId, RunId, SpaceId};

/// Where a tool's result comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolExecution {
    /// Executed inline by the run.
    Server,
    /// Answered externally through `submit_tool_result`; suspends the run.
    Client,
}

/// Context threaded through one tool call.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: RunId,
    pub agent_entity_id: EntityId,
    pub tool_call_id: String,
    pub services: Arc<Services>,
    pub scope: Arc<RunScope>,
}

impl ToolContext {
    /// Space the run currently acts in.
    pub fn active_space(&self) -> Option<SpaceId> {
        self.scope.active_space()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("run_id", &self.run_id)
            .field("agent_entity_id", &self.agent_entity_id)
            .field("tool_call_id", &self.tool_call_id)
            .finish()
    }
}

/// Core tool trait -- implement to create custom tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &ToolParameters;

    fn execution(&self) -> ToolExecution {
        ToolExecution::Server
    }

    /// Whether calls render as a display message in the active space.
    fn is_visible(&self) -> bool {
        false
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<serde_json::Value>;
}

/// Type alias for the tool handler function.
type ToolHandler = dyn Fn(
        ToolArguments,
        ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
    + Send
    + Sync;

/// Closure-based server tool.
pub struct AgentTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    visible: bool,
    handler: Arc<ToolHandler>,
}

impl AgentTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            visible: false,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// Render calls of this tool as display messages.
    pub fn visible(mut self) -> Self {
        self.visible = true;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<serde_json::Value> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("visible", &self.visible)
            .finish()
    }
}

/// A tool whose result is supplied by an external client.
#[derive(Debug, Clone)]
pub struct ClientTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    visible: bool,
}

impl ClientTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: ToolParameters) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            visible: true,
        }
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }
}

impl From<&ClientToolDefinition> for ClientTool {
    fn from(def: &ClientToolDefinition) -> Self {
        Self::new(
            def.name.clone(),
            def.description.clone(),
            ToolParameters::from_schema(def.parameters.clone()),
        )
        .with_visible(def.visible)
    }
}

#[async_trait]
impl Tool for ClientTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn execution(&self) -> ToolExecution {
        ToolExecution::Client
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    async fn execute(&self, _args: &ToolArguments, _ctx: &ToolContext) -> Result<serde_json::Value> {
        Err(AgoraError::InvalidState(format!(
            "{} is answered by the client",
            self.name
        )))
    }
}
