use std::sync::Arc;

use serde_json::json;

use crate::error::{AgoraError, Result};
use crate::run::CompletionIntent;
use crate::tools::tool::{AgentTool, Tool, ToolContext};
use crate::tools::types::ToolParameters;
use crate::types::EntityId;

async fn require_other_agent(ctx: &ToolContext, target: EntityId) -> Result<()> {
    if target == ctx.agent_entity_id {
        return Err(AgoraError::InvalidArgument(
            "cannot address yourself".into(),
        ));
    }
    match ctx.services.directory.entity(target).await? {
        Some(entity) if entity.is_agent() => Ok(()),
        _ => Err(AgoraError::UnknownAgent(target)),
    }
}

/// Hand this run's trigger to another agent. Takes effect when the turn
/// ends: this run is canceled and produces no reply of its own.
pub fn delegate_to_agent_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "delegate_to_agent",
        "Silently hand the current request to another agent. Your run ends without replying.",
        ToolParameters::object()
            .id("agent_id", "Entity id of the agent to delegate to", true)
            .string("note", "Context for the delegate", false)
            .build(),
        |args, ctx: ToolContext| async move {
            let target = args.entity_id("agent_id")?;
            require_other_agent(&ctx, target).await?;
            ctx.scope.push_intent(CompletionIntent::Delegate {
                target,
                note: args.get_str_opt("note").map(str::to_string),
            });
            Ok(json!({ "status": "queued", "target": target }))
        },
    ))
}

pub fn mention_agent_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "mention_agent",
        "Address another agent directly. With expect_reply, its answer comes back to you as a new trigger.",
        ToolParameters::object()
            .id("agent_id", "Entity id of the agent to mention", true)
            .string("message", "What to tell or ask", true)
            .boolean("expect_reply", "Whether you want a reply", false)
            .id("space_id", "Space the mention concerns; defaults to the active space", false)
            .build(),
        |args, ctx: ToolContext| async move {
            let target = args.entity_id("agent_id")?;
            require_other_agent(&ctx, target).await?;
            let space_id = args.space_id_opt("space_id")?.or_else(|| ctx.active_space());
            ctx.scope.push_intent(CompletionIntent::Mention {
                target,
                space_id,
                message: args.get_str("message")?.to_string(),
                expect_reply: args.get_bool_or("expect_reply", false),
            });
            Ok(json!({ "status": "queued", "target": target }))
        },
    ))
}
