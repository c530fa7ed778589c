use std::sync::Arc;

use serde_json::json;

use crate::error::{AgoraError, Result};
use crate::tools::tool::{AgentTool, Tool, ToolContext};
use crate::tools::types::ToolParameters;
use crate::types::{MessageRole, NewMessage, SentMessage, SpaceId};

fn target_space(requested: Option<SpaceId>, ctx: &ToolContext) -> Result<SpaceId> {
    requested.or_else(|| ctx.active_space()).ok_or_else(|| {
        AgoraError::InvalidArgument("no space given and the run has no active space".into())
    })
}

/// Post a message to a space and trigger its other agent members.
///
/// Membership is checked before anything is written, so a refused call
/// leaves neither a message nor a change to the run behind.
pub fn send_message_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "send_message",
        "Post a message to a space you are a member of. Defaults to the active space.",
        ToolParameters::object()
            .string("text", "Message text", true)
            .id("space_id", "Target space; defaults to the active space", false)
            .build(),
        |args, ctx: ToolContext| async move {
            let text = args.get_str("text")?.to_string();
            let space_id = target_space(args.space_id_opt("space_id")?, &ctx)?;
            ctx.services
                .directory
                .require_member(space_id, ctx.agent_entity_id)
                .await?;

            let message = ctx
                .services
                .post(
                    NewMessage::builder()
                        .space_id(space_id)
                        .entity_id(ctx.agent_entity_id)
                        .role(MessageRole::Assistant)
                        .content(text.clone())
                        .metadata(json!({ "runId": ctx.run_id }))
                        .build(),
                    true,
                )
                .await?;
            ctx.scope.record_sent(SentMessage {
                message_id: message.id,
                space_id,
                seq: message.seq,
                content: text,
            });
            Ok(json!({
                "messageId": message.id,
                "spaceId": space_id,
                "seq": message.seq,
            }))
        },
    ))
}

/// Switch the space `send_message` defaults to.
pub fn enter_space_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "enter_space",
        "Make another space you belong to the active space of this run.",
        ToolParameters::object()
            .id("space_id", "Space to enter", true)
            .build(),
        |args, ctx: ToolContext| async move {
            let space_id = args.get_id("space_id")?;
            ctx.services
                .directory
                .require_member(space_id, ctx.agent_entity_id)
                .await?;
            ctx.scope.set_active_space(space_id);
            tracing::debug!(run_id = %ctx.run_id, space_id = %space_id, "active space changed");
            Ok(json!({ "spaceId": space_id }))
        },
    ))
}
