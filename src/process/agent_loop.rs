//! The long-lived loop of one agent entity.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::ProcessState;
use crate::error::Result;
use crate::inbox::{InboxEvent, InboxEventKind};
use crate::run::{Lifecycle, RunExecutor, RunOutcome};
use crate::services::Services;
use crate::types::{EntityId, RunFilter, RunId, RunStatus};

const INTERRUPTED: &str = "interrupted: agent process restarted";

type RunTasks = JoinSet<(RunId, RunOutcome)>;

/// Drain the agent's inbox until `cancel` fires.
///
/// Runs are spawned concurrently; stopping cancels every in-flight run
/// cooperatively and waits for them before returning.
pub async fn run(
    services: Arc<Services>,
    entity_id: EntityId,
    cancel: CancellationToken,
    state: watch::Sender<ProcessState>,
) -> Result<()> {
    let agent = services.agent(entity_id)?;
    let waker = services.inbox.waker(entity_id)?;
    let executor = RunExecutor::new(services.clone());
    let mut runs = RunTasks::new();

    recover(&services, &executor, entity_id, &cancel, &mut runs).await?;
    state.send_if_modified(|current| {
        let starting = *current == ProcessState::Starting;
        if starting {
            *current = ProcessState::Running;
        }
        starting
    });
    tracing::info!(agent = %agent.name, entity_id = %entity_id, "agent process running");

    loop {
        for event in services.inbox.drain(entity_id) {
            dispatch(&executor, event, &cancel, &mut runs).await;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = waker.notified() => {}
            Some(joined) = runs.join_next(), if !runs.is_empty() => log_joined(joined),
        }
    }

    tracing::info!(agent = %agent.name, in_flight = runs.len(), "agent process stopping");
    while let Some(joined) = runs.join_next().await {
        log_joined(joined);
    }
    Ok(())
}

/// Pick up work left behind by a previous process of this agent.
async fn recover(
    services: &Arc<Services>,
    executor: &RunExecutor,
    entity_id: EntityId,
    cancel: &CancellationToken,
    runs: &mut RunTasks,
) -> Result<()> {
    let filter = RunFilter::builder()
        .agent_entity_id(entity_id)
        .statuses(vec![RunStatus::Queued, RunStatus::Running, RunStatus::WaitingTool])
        .build();
    let mut leftovers = services.store.list_runs(&filter).await?;
    leftovers.reverse();

    for run in leftovers {
        match run.status {
            RunStatus::Queued => spawn_execute(executor, run.id, cancel, runs),
            RunStatus::WaitingTool if run.pending_fully_answered() => {
                spawn_resume(executor, run.id, cancel, runs)
            }
            RunStatus::Running => fail_run(services, run.id, INTERRUPTED).await,
            _ => {}
        }
    }
    Ok(())
}

async fn dispatch(
    executor: &RunExecutor,
    event: InboxEvent,
    cancel: &CancellationToken,
    runs: &mut RunTasks,
) {
    match event.kind {
        InboxEventKind::Trigger { trigger } => match executor.start(event.target, trigger).await {
            Ok(run) => spawn_execute(executor, run.id, cancel, runs),
            Err(e) => {
                tracing::error!(target = %event.target, entry = %event.id, error = %e, "run not created")
            }
        },
        InboxEventKind::Resume { run_id } => spawn_resume(executor, run_id, cancel, runs),
        InboxEventKind::Execute { run_id } => spawn_execute(executor, run_id, cancel, runs),
    }
}

fn spawn_execute(executor: &RunExecutor, run_id: RunId, cancel: &CancellationToken, runs: &mut RunTasks) {
    let executor = executor.clone();
    let token = cancel.child_token();
    runs.spawn(supervised(executor.clone(), run_id, async move {
        executor.execute(run_id, token).await
    }));
}

fn spawn_resume(executor: &RunExecutor, run_id: RunId, cancel: &CancellationToken, runs: &mut RunTasks) {
    let executor = executor.clone();
    let token = cancel.child_token();
    runs.spawn(supervised(executor.clone(), run_id, async move {
        executor.resume(run_id, token).await
    }));
}

/// Run an execution; an error or panic that escaped it fails the run.
async fn supervised<F>(executor: RunExecutor, run_id: RunId, execution: F) -> (RunId, RunOutcome)
where
    F: std::future::Future<Output = Result<RunOutcome>> + Send,
{
    let error = match AssertUnwindSafe(execution).catch_unwind().await {
        Ok(Ok(outcome)) => return (run_id, outcome),
        Ok(Err(e)) => e.to_string(),
        Err(panic) => format!("run panicked: {}", panic_message(panic.as_ref())),
    };
    tracing::error!(run_id = %run_id, error = %error, "run execution escaped");
    fail_run(executor.services(), run_id, &error).await;
    (run_id, RunOutcome::Failed)
}

/// Best-effort `failed` transition for a run no execution is driving.
async fn fail_run(services: &Services, run_id: RunId, error: &str) {
    let result = async {
        let emitter = services.open_emitter(run_id).await?;
        Lifecycle::new(services, &emitter).fail(error, None).await
    }
    .await;
    if let Err(e) = result {
        tracing::warn!(run_id = %run_id, error = %e, "could not mark run failed");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn log_joined(joined: std::result::Result<(RunId, RunOutcome), tokio::task::JoinError>) {
    match joined {
        Ok((run_id, outcome)) => tracing::debug!(run_id = %run_id, ?outcome, "run task finished"),
        Err(e) => tracing::error!(error = %e, "run task aborted"),
    }
}
