//! Convenience re-exports for common use.

pub use crate::config::{AgentDefinition, ClientToolDefinition, RuntimeConfig};
pub use crate::error::{AgoraError, ErrorBody, ErrorCategory, Result};
pub use crate::inbox::{Plan, Schedule};
pub use crate::model::{ModelEvent, ModelInvoker, ModelRequest};
pub use crate::process::{ProcessState, RestartPolicy};
pub use crate::runtime::Runtime;
pub use crate::tools::{AgentTool, Tool, ToolArguments, ToolContext, ToolParameters};
pub use crate::types::{
    EntityId, MessageQuery, NewMessage, Run, RunEvent, RunEventKind, RunFilter, RunId,
    RunStatus, SpaceEvent, SpaceEventKind, SpaceId, SpaceMessage, TriggerContext,
};
