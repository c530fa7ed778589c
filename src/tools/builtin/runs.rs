use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::introspection;
use crate::run::CompletionIntent;
use crate::tools::tool::{AgentTool, Tool, ToolContext};
use crate::tools::types::ToolParameters;
use crate::types::RunStatus;

const STATUSES: &[&str] = &[
    "queued",
    "running",
    "waiting_tool",
    "completed",
    "failed",
    "canceled",
];

#[derive(Debug, Deserialize)]
struct RunQuery {
    #[serde(default)]
    statuses: Vec<RunStatus>,
    #[serde(default)]
    limit: Option<usize>,
}

pub fn get_my_runs_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "get_my_runs",
        "List your runs, newest first. Use it to spot work that is already in progress.",
        ToolParameters::object()
            .string_set("statuses", "Only runs in these statuses", STATUSES, false)
            .integer("limit", "Maximum number of runs", false)
            .build(),
        |args, ctx: ToolContext| async move {
            let query: RunQuery = args.deserialize()?;
            let runs = introspection::my_runs(
                &ctx.services,
                ctx.agent_entity_id,
                query.statuses,
                Some(query.limit.unwrap_or(20)),
            )
            .await?;
            let runs: Vec<serde_json::Value> = runs
                .iter()
                .map(|run| {
                    json!({
                        "runId": run.id,
                        "status": run.status,
                        "trigger": run.trigger.kind(),
                        "summary": run.trigger.summary(),
                        "createdAt": run.created_at,
                        "current": run.id == ctx.run_id,
                    })
                })
                .collect();
            Ok(json!({ "runs": runs }))
        },
    ))
}

pub fn stop_run_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "stop_run",
        "Cancel another of your runs that is queued, running or waiting for a tool.",
        ToolParameters::object()
            .id("run_id", "Run to stop", true)
            .string("reason", "Why the run is stopped", false)
            .build(),
        |args, ctx: ToolContext| async move {
            let target = args.run_id("run_id")?;
            let run = introspection::stop_run(
                &ctx.services,
                ctx.agent_entity_id,
                ctx.run_id,
                target,
                args.get_str_opt("reason"),
            )
            .await?;
            Ok(json!({ "runId": run.id, "status": run.status }))
        },
    ))
}

/// Cancel a donor run and return what it already did, so this run can
/// answer for both.
pub fn absorb_run_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "absorb_run",
        "Cancel another of your runs and take over its work. Returns the messages it sent and the tools it called.",
        ToolParameters::object()
            .id("run_id", "Run to absorb", true)
            .build(),
        |args, ctx: ToolContext| async move {
            let donor = args.run_id("run_id")?;
            let summary =
                introspection::absorb_run(&ctx.services, ctx.agent_entity_id, ctx.run_id, donor)
                    .await?;
            ctx.scope.push_intent(CompletionIntent::Absorb { donor });
            Ok(serde_json::to_value(summary)?)
        },
    ))
}
